//! Logical-name-to-endpoint resolution.
//!
//! Every call asks the registry for live healthy instances and falls back
//! to static configuration when discovery has no answer. Nothing is cached:
//! resolution always reflects current registry state.

use std::sync::Arc;

use service_core::error::AppError;
use tracing::{debug, warn};

use crate::config::FallbackConfig;
use crate::services::registry::RegistryHandle;

/// A concrete address for one request. Ephemeral: re-derived per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl ResolvedEndpoint {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Static addressing used when the registry is unreachable or empty.
pub struct FallbackTable {
    scheme: String,
    host: Option<String>,
    services: Vec<String>,
}

impl FallbackTable {
    pub fn from_config(config: &FallbackConfig) -> Self {
        Self {
            scheme: config.scheme.clone(),
            host: config.host.clone(),
            services: config.services.clone(),
        }
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub fn knows(&self, service: &str) -> bool {
        self.services.iter().any(|s| s == service)
    }

    /// Conventional port per service; service names double as hostnames on
    /// the container network when no base host is configured.
    fn default_port(service: &str) -> u16 {
        match service {
            "users" => 8081,
            _ => 8080,
        }
    }

    pub fn endpoint(&self, service: &str) -> Result<ResolvedEndpoint, AppError> {
        let host = match &self.host {
            Some(host) if !host.is_empty() => host.clone(),
            Some(_) => {
                return Err(AppError::ServiceUnavailable(format!(
                    "no usable fallback address for service '{service}'"
                )));
            }
            None => service.to_string(),
        };

        Ok(ResolvedEndpoint {
            scheme: self.scheme.clone(),
            host,
            port: Self::default_port(service),
        })
    }
}

pub struct Resolver {
    registry: RegistryHandle,
    fallback: FallbackTable,
}

impl Resolver {
    pub fn new(registry: RegistryHandle, fallback: FallbackTable) -> Self {
        Self { registry, fallback }
    }

    /// Whether `service` is a routing prefix this gateway recognizes.
    pub fn is_known(&self, service: &str) -> bool {
        self.fallback.knows(service)
    }

    pub fn known_services(&self) -> &[String] {
        self.fallback.services()
    }

    /// Resolve a logical service name to a concrete endpoint.
    ///
    /// Registry trouble (unreachable, query error, zero healthy instances)
    /// degrades to the fallback table; only a broken fallback surfaces an
    /// error to the caller. Among several healthy instances the first is
    /// taken: catalog order, no balancing.
    pub async fn resolve(&self, service: &str) -> Result<ResolvedEndpoint, AppError> {
        match self.registry.transport() {
            Ok(transport) => match transport.query_healthy(service).await {
                Ok(endpoints) => {
                    if let Some(first) = endpoints.first() {
                        debug!(
                            service,
                            address = %first.address,
                            port = first.port,
                            "resolved via service registry"
                        );
                        return Ok(ResolvedEndpoint {
                            scheme: "http".to_string(),
                            host: first.address.clone(),
                            port: first.port,
                        });
                    }
                    debug!(service, "no healthy instances in registry, using fallback");
                }
                Err(err) => {
                    warn!(service, error = %err, "registry query failed, using fallback");
                }
            },
            Err(err) => {
                debug!(service, error = %err, "registry unavailable since startup, using fallback");
            }
        }

        self.fallback.endpoint(service)
    }
}

/// Convenience constructor used by startup and tests.
pub fn build_resolver(registry: RegistryHandle, fallback: &FallbackConfig) -> Arc<Resolver> {
    Arc::new(Resolver::new(registry, FallbackTable::from_config(fallback)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registry::{
        Registration, RegistryError, RegistryTransport, ServiceEndpoint,
    };
    use async_trait::async_trait;

    struct StaticTransport {
        endpoints: Vec<ServiceEndpoint>,
    }

    #[async_trait]
    impl RegistryTransport for StaticTransport {
        async fn register(&self, _registration: &Registration) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn deregister(&self, _service_id: &str) -> Result<(), RegistryError> {
            Ok(())
        }

        async fn query_healthy(
            &self,
            _service: &str,
        ) -> Result<Vec<ServiceEndpoint>, RegistryError> {
            Ok(self.endpoints.clone())
        }
    }

    struct BrokenTransport;

    #[async_trait]
    impl RegistryTransport for BrokenTransport {
        async fn register(&self, _registration: &Registration) -> Result<(), RegistryError> {
            Err(RegistryError::Transport("connection reset".to_string()))
        }

        async fn deregister(&self, _service_id: &str) -> Result<(), RegistryError> {
            Err(RegistryError::Transport("connection reset".to_string()))
        }

        async fn query_healthy(
            &self,
            _service: &str,
        ) -> Result<Vec<ServiceEndpoint>, RegistryError> {
            Err(RegistryError::Transport("connection reset".to_string()))
        }
    }

    fn fallback() -> FallbackConfig {
        FallbackConfig {
            scheme: "http".to_string(),
            host: None,
            services: vec!["users".to_string()],
        }
    }

    #[tokio::test]
    async fn picks_the_first_healthy_instance() {
        let transport = StaticTransport {
            endpoints: vec![
                ServiceEndpoint {
                    address: "10.0.0.5".to_string(),
                    port: 9001,
                },
                ServiceEndpoint {
                    address: "10.0.0.6".to_string(),
                    port: 9002,
                },
            ],
        };
        let resolver = build_resolver(
            RegistryHandle::available(Arc::new(transport)),
            &fallback(),
        );

        let endpoint = resolver.resolve("users").await.unwrap();
        assert_eq!(endpoint.host, "10.0.0.5");
        assert_eq!(endpoint.port, 9001);
        assert_eq!(endpoint.base_url(), "http://10.0.0.5:9001");
    }

    #[tokio::test]
    async fn empty_healthy_set_falls_back_to_static_config() {
        let transport = StaticTransport { endpoints: vec![] };
        let resolver = build_resolver(
            RegistryHandle::available(Arc::new(transport)),
            &fallback(),
        );

        let endpoint = resolver.resolve("users").await.unwrap();
        assert_eq!(endpoint.host, "users");
        assert_eq!(endpoint.port, 8081);
    }

    #[tokio::test]
    async fn transport_failure_falls_back_without_blocking() {
        let resolver = build_resolver(
            RegistryHandle::available(Arc::new(BrokenTransport)),
            &fallback(),
        );

        let started = std::time::Instant::now();
        let endpoint = resolver.resolve("users").await.unwrap();

        assert_eq!(endpoint.host, "users");
        assert_eq!(endpoint.port, 8081);
        // A single failed query, no retry loop in the request path.
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn registry_unavailable_since_startup_uses_fallback() {
        let resolver = build_resolver(
            RegistryHandle::unavailable(RegistryError::Unreachable(
                "consul:8500".to_string(),
            )),
            &fallback(),
        );

        let endpoint = resolver.resolve("users").await.unwrap();
        assert_eq!(endpoint.host, "users");
        assert_eq!(endpoint.port, 8081);
    }

    #[tokio::test]
    async fn configured_base_host_overrides_the_service_name() {
        let resolver = build_resolver(
            RegistryHandle::unavailable(RegistryError::Unreachable(
                "consul:8500".to_string(),
            )),
            &FallbackConfig {
                scheme: "https".to_string(),
                host: Some("backend.internal".to_string()),
                services: vec!["users".to_string(), "billing".to_string()],
            },
        );

        let users = resolver.resolve("users").await.unwrap();
        assert_eq!(users.base_url(), "https://backend.internal:8081");

        // Unlisted-by-table services take the default port.
        let billing = resolver.resolve("billing").await.unwrap();
        assert_eq!(billing.base_url(), "https://backend.internal:8080");
    }

    #[test]
    fn knows_only_the_configured_services() {
        let table = FallbackTable::from_config(&fallback());
        assert!(table.knows("users"));
        assert!(!table.knows("ghost"));
    }
}
