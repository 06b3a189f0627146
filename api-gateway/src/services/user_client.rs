//! Typed client for the user backend's credential and account endpoints.
//!
//! Only login/register need a typed view of the backend; everything else on
//! `/api/users` is forwarded through the proxy. The backend address is
//! re-resolved on every call so discovery changes take effect immediately.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::observability::inject_trace_context;

use crate::services::resolver::Resolver;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

pub struct UserClient {
    http: reqwest::Client,
    resolver: Arc<Resolver>,
}

impl UserClient {
    pub fn new(resolver: Arc<Resolver>, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { http, resolver })
    }

    async fn base_url(&self) -> Result<String, AppError> {
        Ok(self.resolver.resolve("users").await?.base_url())
    }

    fn trace_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);
        headers
    }

    /// Check credentials against the user backend. A backend 401 becomes an
    /// unauthorized error; anything else unexpected is a bad gateway.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<UserRecord, AppError> {
        let url = format!("{}/authenticate", self.base_url().await?);

        let response = self
            .http
            .post(&url)
            .headers(Self::trace_headers())
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "user service authentication call failed");
                AppError::BadGateway("user service unreachable".to_string())
            })?;

        match response.status() {
            reqwest::StatusCode::OK => response.json().await.map_err(|e| {
                AppError::BadGateway(format!("malformed user service response: {e}"))
            }),
            reqwest::StatusCode::UNAUTHORIZED => {
                Err(AppError::Unauthorized(anyhow::anyhow!("invalid credentials")))
            }
            status => Err(AppError::BadGateway(format!(
                "user service returned {status}"
            ))),
        }
    }

    /// Create a new account. Backend rejections surface as bad requests with
    /// the backend's message.
    pub async fn create(&self, user: &NewUser) -> Result<UserRecord, AppError> {
        let url = format!("{}/", self.base_url().await?);

        let response = self
            .http
            .post(&url)
            .headers(Self::trace_headers())
            .json(user)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "user service create call failed");
                AppError::BadGateway("user service unreachable".to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(|e| {
                AppError::BadGateway(format!("malformed user service response: {e}"))
            })
        } else if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            Err(AppError::BadRequest(anyhow::anyhow!(
                "failed to create user: {detail}"
            )))
        } else {
            Err(AppError::BadGateway(format!(
                "user service returned {status}"
            )))
        }
    }
}
