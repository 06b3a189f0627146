//! Shared harness: a mock user backend on a real socket, a stub registry
//! pointing at it, and a gateway router wired the way `main` wires one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api_gateway::config::{
    ConsulConfig, Environment, FallbackConfig, GatewayConfig, JwtConfig, UpstreamConfig,
};
use api_gateway::services::registry::{
    Registration, RegistryError, RegistryHandle, RegistryTransport, ServiceEndpoint,
};
use api_gateway::services::resolver::build_resolver;
use api_gateway::services::token::TokenService;
use api_gateway::services::user_client::UserClient;
use api_gateway::startup::build_router;
use api_gateway::{AppState, proxy};
use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::Path,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use secrecy::Secret;
use serde_json::{Value, json};
use tower::util::ServiceExt;

pub const TEST_SECRET: &str = "e2e-test-secret";

/// Registry stub that reports the mock backend as the one healthy `users`
/// instance.
pub struct StubRegistry {
    users: ServiceEndpoint,
}

#[async_trait]
impl RegistryTransport for StubRegistry {
    async fn register(&self, _registration: &Registration) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn deregister(&self, _service_id: &str) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn query_healthy(&self, service: &str) -> Result<Vec<ServiceEndpoint>, RegistryError> {
        if service == "users" {
            Ok(vec![self.users.clone()])
        } else {
            Ok(vec![])
        }
    }
}

fn user_record(id: &str, role: &str) -> Value {
    json!({
        "id": id,
        "email": format!("{id}@example.com"),
        "first_name": "Test",
        "last_name": "User",
        "role": role,
    })
}

async fn authenticate(Json(body): Json<Value>) -> Response {
    let email = body["email"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();

    let record = match (email, password) {
        ("u1@example.com", "secret-pass") => Some(user_record("u1", "user")),
        ("admin@example.com", "admin-pass") => Some(user_record("admin1", "admin")),
        _ => None,
    };

    match record {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => {
            (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid credentials"})))
                .into_response()
        }
    }
}

async fn create_account(Json(body): Json<Value>) -> Response {
    let role = body["role"].as_str().unwrap_or("user").to_string();
    (StatusCode::CREATED, Json(user_record("u-new", &role))).into_response()
}

async fn list_accounts() -> Json<Value> {
    Json(json!([user_record("u1", "user"), user_record("u2", "user")]))
}

async fn get_account(Path(id): Path<String>) -> Json<Value> {
    Json(user_record(&id, "user"))
}

async fn update_account(Path(id): Path<String>) -> Json<Value> {
    Json(user_record(&id, "user"))
}

async fn delete_account(Path(_id): Path<String>) -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Start the mock user backend on an ephemeral port and return its address.
pub async fn spawn_user_backend() -> SocketAddr {
    let app = Router::new()
        .route("/", get(list_accounts).post(create_account))
        .route("/authenticate", axum::routing::post(authenticate))
        .route("/health", get(|| async { "ok" }))
        .route("/profile", get(|| async { "user profile page" }))
        .route(
            "/teapot",
            get(|| async { (StatusCode::IM_A_TEAPOT, "short and stout") }),
        )
        .route(
            "/:id",
            get(get_account).put(update_account).delete(delete_account),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("mock backend addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock backend serve");
    });

    addr
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        common: service_core::config::Config {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        environment: Environment::Dev,
        service_name: "api-gateway".to_string(),
        service_version: "0.0.0-test".to_string(),
        log_level: "info".to_string(),
        otlp_endpoint: None,
        consul: ConsulConfig {
            address: "127.0.0.1:8500".to_string(),
            advertise_address: "127.0.0.1".to_string(),
            request_timeout_secs: 2,
        },
        jwt: JwtConfig {
            secret: Secret::new(TEST_SECRET.to_string()),
            token_expiry_seconds: 3600,
        },
        fallback: FallbackConfig {
            scheme: "http".to_string(),
            host: None,
            services: vec!["users".to_string()],
        },
        upstream: UpstreamConfig {
            request_timeout_secs: 5,
        },
    }
}

/// Gateway state whose discovery resolves `users` to `backend`.
pub fn test_state(backend: SocketAddr) -> AppState {
    let config = test_config();

    let registry = RegistryHandle::available(Arc::new(StubRegistry {
        users: ServiceEndpoint {
            address: backend.ip().to_string(),
            port: backend.port(),
        },
    }));

    let resolver = build_resolver(registry, &config.fallback);
    let timeout = Duration::from_secs(config.upstream.request_timeout_secs);
    let user_client =
        Arc::new(UserClient::new(resolver.clone(), timeout).expect("user client"));
    let tokens = TokenService::new(&config.jwt);
    let http = proxy::proxy_client(timeout).expect("proxy client");
    let metrics = PrometheusBuilder::new().build_recorder().handle();

    AppState {
        config,
        tokens,
        resolver,
        user_client,
        http,
        metrics,
    }
}

/// Spawn a backend, build the gateway router around it, and hand back both
/// the router and the state (for minting tokens directly).
pub async fn test_gateway() -> (Router, AppState) {
    let backend = spawn_user_backend().await;
    let state = test_state(backend);
    (build_router(state.clone()), state)
}

pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.expect("gateway response")
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}
