use axum::{Json, extract::State};
use serde_json::json;

use crate::AppState;
use crate::services::resolver::ResolvedEndpoint;

/// Plain-text liveness probe; also the target of the registry health check.
pub async fn health_check() -> &'static str {
    "API Gateway is healthy"
}

/// Aggregate view: the gateway itself plus every routable backend, each
/// probed through the same resolution path real traffic takes.
pub async fn services_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut services = serde_json::Map::new();
    services.insert("api-gateway".to_string(), json!("OK"));

    for name in state.resolver.known_services() {
        let status = match state.resolver.resolve(name).await {
            Ok(endpoint) => {
                if probe(&state.http, &endpoint).await {
                    "OK"
                } else {
                    "FAIL"
                }
            }
            Err(_) => "FAIL",
        };
        services.insert(name.clone(), json!(status));
    }

    Json(json!({
        "status": "ok",
        "environment": state.config.environment.to_string(),
        "services": services,
    }))
}

async fn probe(http: &reqwest::Client, endpoint: &ResolvedEndpoint) -> bool {
    http.get(format!("{}/health", endpoint.base_url()))
        .send()
        .await
        .map(|response| response.status().is_success())
        .unwrap_or(false)
}

/// Prometheus exposition of the request metrics.
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}
