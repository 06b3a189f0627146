pub mod config;
pub mod handlers;
pub mod middleware;
pub mod proxy;
pub mod services;
pub mod startup;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::GatewayConfig;
use crate::services::resolver::Resolver;
use crate::services::token::TokenService;
use crate::services::user_client::UserClient;

/// Shared, read-only request-handling state. Everything here is constructed
/// once at startup; request tasks only ever read it.
#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub tokens: TokenService,
    pub resolver: Arc<Resolver>,
    pub user_client: Arc<UserClient>,
    /// Shared client for proxied forwarding. Redirects are not followed:
    /// upstream 3xx responses belong to the caller.
    pub http: reqwest::Client,
    pub metrics: PrometheusHandle,
}
