//! Login, registration and token introspection.
//!
//! Credentials are checked against the user backend; tokens are minted and
//! verified locally by the gateway.

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

use crate::AppState;
use crate::middleware::auth::AuthUser;
use crate::services::user_client::NewUser;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
    #[validate(length(min = 1))]
    pub first_name: String,
    #[validate(length(min = 1))]
    pub last_name: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub expires_in: i64,
    pub user_id: String,
    pub role: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    req.validate()?;

    let user = state
        .user_client
        .authenticate(&req.email, &req.password)
        .await?;

    let token = state.tokens.generate(&user.id, &user.role)?;

    Ok(Json(AuthResponse {
        token,
        expires_in: state.tokens.expiry_seconds(),
        user_id: user.id,
        role: user.role,
    }))
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    req.validate()?;

    // Self-registration always yields a plain user; admin accounts are
    // provisioned through the admin-gated user routes.
    let user = state
        .user_client
        .create(&NewUser {
            email: req.email,
            password: req.password,
            first_name: req.first_name,
            last_name: req.last_name,
            role: "user".to_string(),
        })
        .await?;

    let token = state.tokens.generate(&user.id, &user.role)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            expires_in: state.tokens.expiry_seconds(),
            user_id: user.id,
            role: user.role,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct TokenIntrospection {
    pub valid: bool,
    pub user_id: String,
    pub role: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Report what the presented (already verified) token says about its holder.
pub async fn check_token(AuthUser(claims): AuthUser) -> Result<Json<TokenIntrospection>, AppError> {
    let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0).ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!("token carries an invalid expiry"))
    })?;

    Ok(Json(TokenIntrospection {
        valid: true,
        user_id: claims.sub,
        role: claims.role,
        expires_at,
    }))
}
