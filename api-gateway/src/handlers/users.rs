//! Role-gated user-management routes, forwarded to the user backend.
//!
//! Listing, creating and deleting accounts is admin territory; reading or
//! updating a specific account is open to that account's own subject as
//! well. After the gate, requests are proxied with the `/api/users` prefix
//! rewritten away — the backend serves at its root, exactly as on the
//! legacy passthrough path.

use axum::{
    extract::{Path, Request, State},
    response::Response,
};
use service_core::error::AppError;

use crate::AppState;
use crate::middleware::auth::AuthUser;
use crate::proxy::forward;

async fn forward_to_users(state: &AppState, path: String, req: Request) -> Result<Response, AppError> {
    let endpoint = state.resolver.resolve("users").await?;
    forward(state, &endpoint, &path, req).await
}

pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    req: Request,
) -> Result<Response, AppError> {
    claims.require_role("admin")?;
    forward_to_users(&state, "/".to_string(), req).await
}

pub async fn create_user(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    req: Request,
) -> Result<Response, AppError> {
    claims.require_role("admin")?;
    forward_to_users(&state, "/".to_string(), req).await
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AuthUser(claims): AuthUser,
    req: Request,
) -> Result<Response, AppError> {
    claims.require_self_or_admin(&id)?;
    forward_to_users(&state, format!("/{id}"), req).await
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AuthUser(claims): AuthUser,
    req: Request,
) -> Result<Response, AppError> {
    claims.require_self_or_admin(&id)?;
    forward_to_users(&state, format!("/{id}"), req).await
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AuthUser(claims): AuthUser,
    req: Request,
) -> Result<Response, AppError> {
    claims.require_role("admin")?;
    forward_to_users(&state, format!("/{id}"), req).await
}
