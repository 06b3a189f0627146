use std::sync::Arc;
use std::time::Duration;

use api_gateway::config::GatewayConfig;
use api_gateway::services::registry::{RegistryClient, RegistryHandle, ServiceInstance};
use api_gateway::services::resolver::build_resolver;
use api_gateway::services::token::TokenService;
use api_gateway::services::user_client::UserClient;
use api_gateway::{AppState, proxy, startup::build_router};
use metrics_exporter_prometheus::PrometheusBuilder;
use service_core::observability::logging::init_tracing;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = GatewayConfig::from_env().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {}", e))?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        "Starting API gateway"
    );

    // One token governs every background loop; the signal handler fires it
    // so retries and keep-alive stop with the server.
    let shutdown = CancellationToken::new();

    // The registry connection is attempted exactly once; a failure is
    // captured in the handle and the gateway runs on static fallback.
    let registry = RegistryHandle::connect(&config.consul, &shutdown).await;

    let resolver = build_resolver(registry.clone(), &config.fallback);
    let upstream_timeout = Duration::from_secs(config.upstream.request_timeout_secs);
    let user_client = Arc::new(UserClient::new(resolver.clone(), upstream_timeout)?);
    let tokens = TokenService::new(&config.jwt);
    let http = proxy::proxy_client(upstream_timeout)?;

    let state = AppState {
        config: config.clone(),
        tokens,
        resolver,
        user_client,
        http,
        metrics,
    };

    // Announce this gateway and keep the registration alive. Registration
    // failure is non-fatal: the loop keeps trying on its own cadence.
    let mut registry_client = None;
    if let Ok(transport) = registry.transport() {
        let instance = ServiceInstance::new(
            &config.service_name,
            &config.consul.advertise_address,
            config.common.port,
        );
        let client = Arc::new(RegistryClient::new(transport.clone(), &instance));

        let announce = client.clone();
        let announce_cancel = shutdown.clone();
        tokio::spawn(async move {
            let _ = announce.register(&announce_cancel).await;
            announce.run_keep_alive(announce_cancel).await;
        });

        registry_client = Some(client);
    }

    let app = build_router(state);

    let address = format!("{}:{}", config.common.host, config.common.port);
    let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
        tracing::error!(address = %address, error = %e, "Failed to bind TCP listener");
        anyhow::anyhow!("Failed to bind to address {}: {}", address, e)
    })?;

    tracing::info!(address = %address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Server error");
            anyhow::anyhow!("Server error: {}", e)
        })?;

    // In-flight requests have drained; tell the registry we are gone.
    shutdown.cancel();
    if let Some(client) = registry_client {
        client.deregister().await;
    }

    tracing::info!("API gateway stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    // Stop background registration work; the server drains in-flight
    // requests, each bounded by the upstream call timeouts.
    shutdown.cancel();
}
