//! Client for the Consul-compatible service catalog.
//!
//! The gateway registers its own health-checkable endpoint, re-announces it
//! on a fixed cadence to outlive agent-side TTL expiry, and answers
//! "who is healthy for this service name" queries for the resolver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use service_core::retry::{RetryError, RetryPolicy};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConsulConfig;

/// Total registration attempts before giving up and running undiscoverable.
pub const REGISTER_ATTEMPTS: u32 = 5;
/// Delay between registration attempts.
pub const REGISTER_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Cadence of keep-alive re-registration.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry transport error: {0}")]
    Transport(String),

    #[error("registry returned unexpected status {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    #[error("registry unreachable at {0}")]
    Unreachable(String),

    #[error("registration cancelled by shutdown")]
    Cancelled,
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Transport(err.to_string())
    }
}

/// This process's announcement of itself.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub health_check_url: String,
    /// Unique per (name, address, port); re-registering under the same id
    /// replaces the previous record instead of duplicating it.
    pub id: String,
}

impl ServiceInstance {
    pub fn new(name: &str, address: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            port,
            health_check_url: format!("http://{address}:{port}/health"),
            id: format!("{name}-{address}-{port}"),
        }
    }
}

/// Wire form of an agent service registration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Registration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub check: AgentCheck,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentCheck {
    #[serde(rename = "HTTP")]
    pub http: String,
    pub interval: String,
    pub timeout: String,
    pub deregister_critical_service_after: String,
}

impl Registration {
    pub fn for_instance(instance: &ServiceInstance) -> Self {
        Self {
            id: instance.id.clone(),
            name: instance.name.clone(),
            address: instance.address.clone(),
            port: instance.port,
            check: AgentCheck {
                http: instance.health_check_url.clone(),
                interval: "10s".to_string(),
                timeout: "1s".to_string(),
                deregister_critical_service_after: "30s".to_string(),
            },
        }
    }
}

/// A healthy instance as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub address: String,
    pub port: u16,
}

/// The registry seam: everything the gateway needs from a service catalog.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError>;
    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError>;
    /// Healthy instances of `service`, in catalog order.
    async fn query_healthy(&self, service: &str) -> Result<Vec<ServiceEndpoint>, RegistryError>;
}

#[derive(Deserialize)]
struct HealthEntry {
    #[serde(rename = "Service")]
    service: HealthService,
}

#[derive(Deserialize)]
struct HealthService {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

/// `RegistryTransport` over the Consul agent HTTP API.
pub struct ConsulTransport {
    http: reqwest::Client,
    base_url: String,
}

impl ConsulTransport {
    /// Build a transport and probe the agent before handing it out, so a
    /// dead registry is discovered once at startup rather than on every
    /// request.
    pub async fn connect(
        config: &ConsulConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, RegistryError> {
        let base_url = normalize_base_url(&config.address);
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Transport(e.to_string()))?;

        let transport = Self { http, base_url };

        info!(address = %transport.base_url, "connecting to service registry");

        let policy = RetryPolicy::fixed(CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY);
        match policy
            .run("registry_connect", cancel, || transport.ping())
            .await
        {
            Ok(()) => {
                info!(address = %transport.base_url, "connected to service registry");
                Ok(transport)
            }
            Err(RetryError::Cancelled) => Err(RegistryError::Cancelled),
            Err(RetryError::Exhausted(_)) => {
                Err(RegistryError::Unreachable(transport.base_url.clone()))
            }
        }
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        let response = self
            .http
            .get(format!("{}/v1/status/leader", self.base_url))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RegistryError::UnexpectedStatus(response.status()))
        }
    }
}

fn normalize_base_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", address.trim_end_matches('/'))
    }
}

#[async_trait]
impl RegistryTransport for ConsulTransport {
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError> {
        let response = self
            .http
            .put(format!("{}/v1/agent/service/register", self.base_url))
            .json(registration)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RegistryError::UnexpectedStatus(response.status()))
        }
    }

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError> {
        let response = self
            .http
            .put(format!(
                "{}/v1/agent/service/deregister/{service_id}",
                self.base_url
            ))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RegistryError::UnexpectedStatus(response.status()))
        }
    }

    async fn query_healthy(&self, service: &str) -> Result<Vec<ServiceEndpoint>, RegistryError> {
        let response = self
            .http
            .get(format!("{}/v1/health/service/{service}", self.base_url))
            .query(&[("passing", "true")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RegistryError::UnexpectedStatus(response.status()));
        }

        let entries: Vec<HealthEntry> = response.json().await?;

        Ok(entries
            .into_iter()
            .map(|entry| ServiceEndpoint {
                address: entry.service.address,
                port: entry.service.port,
            })
            .collect())
    }
}

/// The once-constructed registry connection shared across the process.
///
/// Construction happens exactly once at startup; a failure is captured here
/// and consulted by every caller instead of re-dialing the agent per call.
#[derive(Clone)]
pub struct RegistryHandle {
    inner: Arc<Result<Arc<dyn RegistryTransport>, RegistryError>>,
}

impl RegistryHandle {
    pub fn available(transport: Arc<dyn RegistryTransport>) -> Self {
        Self {
            inner: Arc::new(Ok(transport)),
        }
    }

    pub fn unavailable(err: RegistryError) -> Self {
        Self {
            inner: Arc::new(Err(err)),
        }
    }

    pub async fn connect(config: &ConsulConfig, cancel: &CancellationToken) -> Self {
        match ConsulTransport::connect(config, cancel).await {
            Ok(transport) => Self::available(Arc::new(transport)),
            Err(err) => {
                warn!(
                    error = %err,
                    "could not connect to service registry; resolution will use static fallback"
                );
                Self::unavailable(err)
            }
        }
    }

    pub fn transport(&self) -> Result<&Arc<dyn RegistryTransport>, &RegistryError> {
        self.inner.as_ref().as_ref()
    }
}

/// Owns this process's registration lifecycle against a live transport.
pub struct RegistryClient {
    transport: Arc<dyn RegistryTransport>,
    registration: Registration,
}

impl RegistryClient {
    pub fn new(transport: Arc<dyn RegistryTransport>, instance: &ServiceInstance) -> Self {
        Self {
            transport,
            registration: Registration::for_instance(instance),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.registration.id
    }

    /// Submit the registration, retrying on failure. Exhausted retries are
    /// logged and reported, never escalated: an unregistered gateway keeps
    /// serving, it is merely undiscoverable.
    pub async fn register(&self, cancel: &CancellationToken) -> Result<(), RegistryError> {
        let policy =
            RetryPolicy::fixed(REGISTER_ATTEMPTS, REGISTER_RETRY_DELAY).with_jitter();

        match policy
            .run("service_register", cancel, || {
                self.transport.register(&self.registration)
            })
            .await
        {
            Ok(()) => {
                info!(
                    service = %self.registration.name,
                    id = %self.registration.id,
                    "registered with service registry"
                );
                Ok(())
            }
            Err(RetryError::Cancelled) => Err(RegistryError::Cancelled),
            Err(RetryError::Exhausted(err)) => {
                warn!(
                    service = %self.registration.name,
                    error = %err,
                    "registration failed after retries; continuing undiscoverable"
                );
                Err(err)
            }
        }
    }

    /// Re-announce the registration every `KEEP_ALIVE_INTERVAL` until the
    /// shutdown token fires. A failed tick is logged and retried on the
    /// next one.
    pub async fn run_keep_alive(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; registration already happened.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(id = %self.registration.id, "keep-alive loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.transport.register(&self.registration).await {
                        Ok(()) => debug!(id = %self.registration.id, "keep-alive re-registration ok"),
                        Err(err) => warn!(
                            id = %self.registration.id,
                            error = %err,
                            "keep-alive re-registration failed; will retry next tick"
                        ),
                    }
                }
            }
        }
    }

    /// Remove the registration; called once at graceful shutdown.
    pub async fn deregister(&self) {
        match self.transport.deregister(&self.registration.id).await {
            Ok(()) => info!(id = %self.registration.id, "deregistered from service registry"),
            Err(err) => warn!(
                id = %self.registration.id,
                error = %err,
                "failed to deregister from service registry"
            ),
        }
    }
}
