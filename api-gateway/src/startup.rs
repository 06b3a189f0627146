use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;
use crate::handlers::{auth, health, users};
use crate::middleware::auth::auth_middleware;
use crate::proxy;

pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/register", post(auth::register))
        .route(
            "/check-token",
            get(auth::check_token)
                .layer(from_fn_with_state(state.clone(), auth_middleware)),
        );

    let user_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route(
            "/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/services", get(health::services_health))
        .route("/metrics", get(health::metrics))
        .nest("/api/auth", auth_routes)
        .nest("/api/users", user_routes)
        // Anything else is treated as a legacy passthrough to a named backend.
        .fallback(proxy::legacy_proxy)
        .layer(CorsLayer::permissive())
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = service_core::observability::extract_request_id(request.headers())
                    .unwrap_or_else(|| "-".to_string());

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
