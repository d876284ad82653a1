//! Configuration schema definitions.
//!
//! Every section and field is defaulted so a file may name only what it changes.
//!
//! ```toml
//! [defaults.retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//!
//! [[services]]
//! name = "fx"
//! base_address = "http://fx.internal:8080/api/"
//! cache_reads = true
//! cache_ttl_secs = 30
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::client::registry::ServiceDescriptor;
use crate::client::service::ClientOptions;
use crate::resilience::circuit_breaker::BreakerConfig;
use crate::resilience::retries::RetryPolicy;

/// Root configuration of the guard daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GuardConfig {
    pub observability: ObservabilityConfig,
    pub admin: AdminConfig,
    pub gateway: GatewayConfig,
    pub cache: CacheConfig,
    pub defaults: DefaultsConfig,
    pub services: Vec<ServiceConfig>,
}

impl GuardConfig {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            default_retry: self.defaults.retry.to_policy(),
            cache_max_entries: self.cache.max_entries,
            cache_default_ttl: Duration::from_secs(self.cache.default_ttl_secs),
        }
    }

    /// Descriptors for every configured service, in file order.
    pub fn descriptors(&self) -> Result<Vec<ServiceDescriptor>, url::ParseError> {
        self.services
            .iter()
            .map(|service| service.to_descriptor(&self.defaults))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // placeholder, validation rejects it when admin is enabled
            api_key: DEFAULT_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

pub const DEFAULT_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Forwarding gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub enabled: bool,

    pub bind_address: String,

    /// Inbound headers copied onto the upstream request (case-insensitive).
    pub forward_headers: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
            forward_headers: vec![
                "accept".to_string(),
                "authorization".to_string(),
                "content-type".to_string(),
            ],
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,

    /// TTL used when neither the request nor the service names one.
    pub default_ttl_secs: u64,

    /// Interval of the background expiry sweep.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl_secs: 60,
            sweep_interval_secs: 30,
        }
    }
}

/// Defaults applied to services that do not override them.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DefaultsConfig {
    pub retry: RetryConfig,
    pub breaker: BreakerSettings,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            breaker: BreakerSettings::default(),
            timeout_ms: 10_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    pub backoff_multiplier: f64,

    /// Upper bound on computed delays in milliseconds.
    pub max_delay_ms: u64,

    /// Relative jitter in [0, 1).
    pub jitter: f64,

    /// Longest wait honoured from a `Retry-After` hint, in milliseconds.
    pub max_retry_after_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: duration_ms(policy.base_delay),
            backoff_multiplier: policy.backoff_multiplier,
            max_delay_ms: duration_ms(policy.max_delay),
            jitter: policy.jitter,
            max_retry_after_ms: duration_ms(policy.max_retry_after),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
            max_retry_after: Duration::from_millis(self.max_retry_after_ms),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub half_open_quota: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let config = BreakerConfig::default();
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout_ms: duration_ms(config.reset_timeout),
            half_open_quota: config.half_open_quota,
        }
    }
}

impl BreakerSettings {
    pub fn to_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            half_open_quota: self.half_open_quota,
        }
    }
}

/// One remote service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,

    pub base_address: String,

    /// Per-attempt timeout in milliseconds; falls back to `defaults.timeout_ms`.
    pub timeout_ms: Option<u64>,

    /// Headers sent with every request to this service.
    pub headers: BTreeMap<String, String>,

    pub retry: Option<RetryConfig>,

    pub breaker: Option<BreakerSettings>,

    pub cache_ttl_secs: Option<u64>,

    /// Cache GET/HEAD responses forwarded through the gateway.
    pub cache_reads: bool,
}

impl ServiceConfig {
    pub fn to_descriptor(&self, defaults: &DefaultsConfig) -> Result<ServiceDescriptor, url::ParseError> {
        let breaker = self.breaker.as_ref().unwrap_or(&defaults.breaker).to_config();
        let timeout = Duration::from_millis(self.timeout_ms.unwrap_or(defaults.timeout_ms));

        let mut descriptor = ServiceDescriptor::new(self.name.clone(), &self.base_address)?
            .with_timeout(timeout)
            .with_breaker(breaker)
            .with_cache_reads(self.cache_reads);
        for (name, value) in &self.headers {
            descriptor = descriptor.with_header(name.clone(), value.clone());
        }
        if let Some(retry) = &self.retry {
            descriptor = descriptor.with_retry(retry.to_policy());
        }
        if let Some(ttl) = self.cache_ttl_secs {
            descriptor = descriptor.with_cache_ttl(Duration::from_secs(ttl));
        }
        Ok(descriptor)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
