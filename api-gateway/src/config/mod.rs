use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    /// OTLP collector endpoint; span export is disabled when unset.
    pub otlp_endpoint: Option<String>,
    pub consul: ConsulConfig,
    pub jwt: JwtConfig,
    pub fallback: FallbackConfig,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!(
                "unknown environment '{other}', expected 'dev' or 'prod'"
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Dev => write!(f, "development"),
            Environment::Prod => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsulConfig {
    /// Agent address, with or without a scheme (e.g. `consul:8500`).
    pub address: String,
    /// Address other services reach this process at; defaults to the
    /// container hostname, which doubles as the Docker DNS name.
    pub advertise_address: String,
    /// Per-call timeout for registry requests.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    pub token_expiry_seconds: i64,
}

/// Static addressing used when the registry has no answer.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub scheme: String,
    /// Base host override; when unset each service name is used as its own
    /// host (the Docker network convention).
    pub host: Option<String>,
    /// Logical service names the gateway will route to.
    pub services: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Timeout for proxied and user-service calls.
    pub request_timeout_secs: u64,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        let fallback_host = if is_prod {
            optional_env("PROD_HOST")
        } else {
            optional_env("DEV_HOST")
        };

        let config = GatewayConfig {
            common,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("api-gateway"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: optional_env("OTLP_ENDPOINT"),
            consul: ConsulConfig {
                address: get_env("CONSUL_ADDRESS", Some("127.0.0.1:8500"), false)?,
                advertise_address: get_env(
                    "ADVERTISE_ADDRESS",
                    Some(&hostname_or_localhost()),
                    false,
                )?,
                request_timeout_secs: parse_env("CONSUL_TIMEOUT_SECS", "2")?,
            },
            jwt: JwtConfig {
                // The dev default never reaches production: there the secret
                // must be provided explicitly.
                secret: Secret::new(get_env(
                    "JWT_SECRET",
                    Some("insecure-dev-secret"),
                    is_prod,
                )?),
                token_expiry_seconds: parse_env("JWT_EXPIRY_SECONDS", "3600")?,
            },
            fallback: FallbackConfig {
                scheme: if is_prod { "https" } else { "http" }.to_string(),
                host: fallback_host,
                services: get_env("GATEWAY_SERVICES", Some("users"), false)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            upstream: UpstreamConfig {
                request_timeout_secs: parse_env("UPSTREAM_TIMEOUT_SECS", "5")?,
            },
        };

        Ok(config)
    }
}

/// Read an environment variable, falling back to `default` unless
/// `require_explicit` demands the operator set it (used for secrets in
/// production).
fn get_env(key: &str, default: Option<&str>, require_explicit: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => match default {
            Some(value) if !require_explicit => Ok(value.to_string()),
            _ => Err(AppError::ConfigError(anyhow::anyhow!(
                "missing required environment variable {key}"
            ))),
        },
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    get_env(key, Some(default), false)?.parse().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("invalid value for {key}: {e}"))
    })
}

fn hostname_or_localhost() -> String {
    env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
