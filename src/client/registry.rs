//! Service registry.
//!
//! # Responsibilities
//! - Hold the descriptor and circuit breaker for every named service
//! - Make registration idempotent: re-registering swaps transport defaults, never breaker state

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::observability::events::SharedSink;
use crate::resilience::circuit_breaker::{BreakerConfig, CircuitBreaker};
use crate::resilience::retries::RetryPolicy;

/// Identity and transport defaults of a remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub base_address: Url,
    pub default_headers: BTreeMap<String, String>,
    pub default_timeout: Duration,
    pub retry: Option<RetryPolicy>,
    pub breaker: BreakerConfig,
    pub cache_ttl: Option<Duration>,
    /// Reads through the gateway are cacheable by default.
    pub cache_reads: bool,
}

impl ServiceDescriptor {
    /// The base address path always ends in `/` so relative paths join beneath it.
    pub fn new(name: impl Into<String>, base_address: &str) -> Result<Self, url::ParseError> {
        let mut base_address = Url::parse(base_address)?;
        if !base_address.path().ends_with('/') {
            let path = format!("{}/", base_address.path());
            base_address.set_path(&path);
        }
        Ok(Self {
            name: name.into(),
            base_address,
            default_headers: BTreeMap::new(),
            default_timeout: Duration::from_secs(10),
            retry: None,
            breaker: BreakerConfig::default(),
            cache_ttl: None,
            cache_reads: false,
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_cache_reads(mut self, cache_reads: bool) -> Self {
        self.cache_reads = cache_reads;
        self
    }
}

/// Registered service: swappable descriptor plus its long-lived breaker.
pub struct ServiceEntry {
    descriptor: ArcSwap<ServiceDescriptor>,
    breaker: Arc<CircuitBreaker>,
}

impl ServiceEntry {
    pub fn descriptor(&self) -> Arc<ServiceDescriptor> {
        self.descriptor.load_full()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    Updated,
}

/// A thread-safe map of service name → entry.
#[derive(Clone)]
pub struct ServiceRegistry {
    services: Arc<DashMap<String, Arc<ServiceEntry>>>,
    sink: SharedSink,
}

impl ServiceRegistry {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            services: Arc::new(DashMap::new()),
            sink,
        }
    }

    /// Register or update a service.
    pub fn register(&self, descriptor: ServiceDescriptor) -> Registration {
        let name = descriptor.name.clone();
        match self.services.entry(name.clone()) {
            Entry::Occupied(existing) => {
                let entry = existing.get();
                entry.breaker.reconfigure(descriptor.breaker.clone());
                entry.descriptor.store(Arc::new(descriptor));
                tracing::info!(service = %name, "Service descriptor updated");
                Registration::Updated
            }
            Entry::Vacant(slot) => {
                let breaker = Arc::new(CircuitBreaker::new(
                    name.clone(),
                    descriptor.breaker.clone(),
                    self.sink.clone(),
                ));
                tracing::info!(
                    service = %name,
                    base_address = %descriptor.base_address,
                    "Service registered"
                );
                slot.insert(Arc::new(ServiceEntry {
                    descriptor: ArcSwap::from_pointee(descriptor),
                    breaker,
                }));
                Registration::Registered
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.services.get(name).map(|r| r.value().clone())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::events::NoopSink;
    use crate::resilience::circuit_breaker::BreakerStatus;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(Arc::new(NoopSink))
    }

    #[test]
    fn test_base_address_gets_trailing_slash() {
        let d = ServiceDescriptor::new("geo", "http://geo.internal/api").unwrap();
        assert_eq!(d.base_address.as_str(), "http://geo.internal/api/");
        assert!(ServiceDescriptor::new("bad", "not a url").is_err());
    }

    #[tokio::test]
    async fn test_reregister_keeps_breaker_state() {
        let reg = registry();
        let first = ServiceDescriptor::new("geo", "http://a.internal/")
            .unwrap()
            .with_breaker(BreakerConfig {
                failure_threshold: 1,
                ..BreakerConfig::default()
            });
        assert_eq!(reg.register(first), Registration::Registered);

        let entry = reg.get("geo").unwrap();
        entry.breaker().admit().unwrap().record_failure();
        assert_eq!(entry.breaker().status(), BreakerStatus::Open);

        let second = ServiceDescriptor::new("geo", "http://b.internal/")
            .unwrap()
            .with_timeout(Duration::from_secs(3));
        assert_eq!(reg.register(second), Registration::Updated);

        let entry = reg.get("geo").unwrap();
        assert_eq!(entry.descriptor().base_address.as_str(), "http://b.internal/");
        assert_eq!(entry.descriptor().default_timeout, Duration::from_secs(3));
        assert_eq!(entry.breaker().status(), BreakerStatus::Open);
        assert_eq!(entry.breaker().config(), BreakerConfig::default());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_names_sorted() {
        let reg = registry();
        for name in ["zeta", "alpha", "mid"] {
            reg.register(ServiceDescriptor::new(name, "http://x.internal/").unwrap());
        }
        assert_eq!(reg.names(), vec!["alpha", "mid", "zeta"]);
        assert!(reg.get("missing").is_none());
    }
}
