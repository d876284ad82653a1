//! Service client: the call orchestrator.
//!
//! # Data Flow
//! ```text
//! call(service, spec)
//!     → registry lookup, request resolution
//!     → cacheable? cache lookup → hit returns immediately
//!     → breaker.admit() → None: BreakerOpen, no transport
//!     → RetryExecutor::run(transport attempt under per-attempt timeout)
//!     → admission.record_success / record_failure (once per sequence)
//!       a dropped call future releases its admission unsettled
//!     → cacheable success stored with TTL
//!     → call.completed event
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CacheKey, CacheStats, ResponseCache};
use crate::client::error::ClientError;
use crate::client::registry::{Registration, ServiceDescriptor, ServiceEntry, ServiceRegistry};
use crate::client::request::{RequestSpec, Response};
use crate::client::transport::{status_failure, PreparedRequest, Transport};
use crate::lifecycle::cancel::CancelToken;
use crate::observability::events::{CallOutcome, Event, SharedSink};
use crate::resilience::circuit_breaker::{Admission, BreakerSnapshot};
use crate::resilience::classifier::Failure;
use crate::resilience::retries::{elapsed_ms, Attempted, RetryError, RetryExecutor, RetryPolicy};
use crate::resilience::timeouts::with_timeout;

/// Client-wide defaults.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub default_retry: RetryPolicy,
    pub cache_max_entries: usize,
    pub cache_default_ttl: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            default_retry: RetryPolicy::default(),
            cache_max_entries: 10_000,
            cache_default_ttl: Duration::from_secs(60),
        }
    }
}

/// Breaker state of one service, as reported by the admin API.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub base_address: String,
    pub breaker: BreakerSnapshot,
}

/// Issues guarded calls to registered services.
#[derive(Clone)]
pub struct ServiceClient {
    registry: ServiceRegistry,
    cache: ResponseCache,
    executor: RetryExecutor,
    transport: Arc<dyn Transport>,
    sink: SharedSink,
    options: ClientOptions,
}

impl ServiceClient {
    pub fn new(transport: Arc<dyn Transport>, sink: SharedSink, options: ClientOptions) -> Self {
        Self {
            registry: ServiceRegistry::new(sink.clone()),
            cache: ResponseCache::with_sink(
                options.cache_max_entries,
                options.cache_default_ttl,
                sink.clone(),
            ),
            executor: RetryExecutor::new(sink.clone()),
            transport,
            sink,
            options,
        }
    }

    pub fn register_service(&self, descriptor: ServiceDescriptor) -> Registration {
        self.registry.register(descriptor)
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    fn entry(&self, service: &str) -> Result<Arc<ServiceEntry>, ClientError> {
        self.registry
            .get(service)
            .ok_or_else(|| ClientError::UnknownService(service.to_string()))
    }

    /// Issue one logical call.
    pub async fn call(&self, service: &str, request: RequestSpec) -> Result<Response, ClientError> {
        let span = tracing::info_span!(
            "call",
            service = %service,
            call_id = %Uuid::new_v4(),
            method = %request.method,
            path = %request.path,
        );
        self.call_inner(service, request).instrument(span).await
    }

    async fn call_inner(&self, service: &str, request: RequestSpec) -> Result<Response, ClientError> {
        let started = Instant::now();
        let entry = self.entry(service)?;
        let descriptor = entry.descriptor();
        let prepared = PreparedRequest::resolve(&descriptor, &request)
            .map_err(|e| ClientError::InvalidRequest(format!("bad path '{}': {}", request.path, e)))?;

        let cache_key = request
            .cacheable
            .then(|| CacheKey::derive(service, &request.path, &request.query).into_string());

        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(key) {
                self.complete(service, 0, started, CallOutcome::CacheHit);
                return Ok(hit);
            }
        }

        let Some(admission) = entry.breaker().admit() else {
            self.sink.emit(&Event::CallShortCircuited {
                service: service.to_string(),
            });
            self.complete(service, 0, started, CallOutcome::ShortCircuited);
            return Err(ClientError::BreakerOpen {
                service: service.to_string(),
            });
        };

        let policy = request
            .retry_policy
            .clone()
            .or_else(|| descriptor.retry.clone())
            .unwrap_or_else(|| self.options.default_retry.clone());
        let timeout = request.timeout.unwrap_or(descriptor.default_timeout);
        let transport = self.transport.clone();

        let result = self
            .executor
            .run(service, &policy, request.cancel.as_ref(), || {
                let transport = transport.clone();
                let prepared = prepared.clone();
                async move {
                    with_timeout(timeout, async move {
                        let response = transport.send(prepared).await?;
                        if response.is_success() {
                            Ok(response)
                        } else {
                            Err(status_failure(&response))
                        }
                    })
                    .await
                }
            })
            .await;

        match result {
            Ok(Attempted { value, attempts }) => {
                admission.record_success();
                if let Some(key) = cache_key {
                    let ttl = request
                        .cache_ttl
                        .or(descriptor.cache_ttl)
                        .unwrap_or_else(|| self.cache.default_ttl());
                    self.cache.set(key, value.clone(), ttl);
                }
                self.complete(service, attempts, started, CallOutcome::Success);
                Ok(value)
            }
            Err(error) => Err(self.settle_failure(service, admission, error, started)),
        }
    }

    /// Run an arbitrary operation behind the service's breaker and retry policy.
    ///
    /// No caching and no transport: `op` performs the work itself.
    pub async fn run_guarded<T, F, Fut>(
        &self,
        service: &str,
        policy: Option<&RetryPolicy>,
        cancel: Option<&CancelToken>,
        op: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let started = Instant::now();
        let entry = self.entry(service)?;
        let descriptor = entry.descriptor();

        let Some(admission) = entry.breaker().admit() else {
            self.sink.emit(&Event::CallShortCircuited {
                service: service.to_string(),
            });
            self.complete(service, 0, started, CallOutcome::ShortCircuited);
            return Err(ClientError::BreakerOpen {
                service: service.to_string(),
            });
        };

        let policy = policy
            .cloned()
            .or_else(|| descriptor.retry.clone())
            .unwrap_or_else(|| self.options.default_retry.clone());

        match self.executor.run(service, &policy, cancel, op).await {
            Ok(Attempted { value, attempts }) => {
                admission.record_success();
                self.complete(service, attempts, started, CallOutcome::Success);
                Ok(value)
            }
            Err(error) => Err(self.settle_failure(service, admission, error, started)),
        }
    }

    fn settle_failure(
        &self,
        service: &str,
        admission: Admission<'_>,
        error: RetryError,
        started: Instant,
    ) -> ClientError {
        let attempts = error.attempts();
        let outcome = match &error {
            RetryError::Cancelled { .. } => {
                admission.release();
                CallOutcome::Cancelled
            }
            RetryError::Permanent { error, .. } | RetryError::Exhausted { error, .. } => {
                admission.record_failure();
                CallOutcome::Failed {
                    category: error.category,
                }
            }
        };
        self.complete(service, attempts, started, outcome);
        ClientError::from_retry(service, error)
    }

    fn complete(&self, service: &str, attempts: u32, started: Instant, outcome: CallOutcome) {
        self.sink.emit(&Event::CallCompleted {
            service: service.to_string(),
            attempts,
            duration_ms: elapsed_ms(started),
            outcome,
        });
    }

    /// Administrative breaker reset.
    pub fn reset_breaker(&self, service: &str) -> Result<BreakerSnapshot, ClientError> {
        let entry = self.entry(service)?;
        entry.breaker().reset();
        Ok(entry.breaker().snapshot())
    }

    pub fn breaker_status(&self, service: &str) -> Result<BreakerSnapshot, ClientError> {
        Ok(self.entry(service)?.breaker().snapshot())
    }

    /// Drop cached responses whose key starts with `prefix` (e.g. `fx:/rates`).
    pub fn invalidate_cache(&self, prefix: &str) -> usize {
        self.cache.invalidate(prefix)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn services(&self) -> Vec<ServiceStatus> {
        self.registry
            .names()
            .into_iter()
            .filter_map(|name| {
                self.registry.get(&name).map(|entry| ServiceStatus {
                    base_address: entry.descriptor().base_address.to_string(),
                    breaker: entry.breaker().snapshot(),
                    name,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::cancel::CancelSource;
    use crate::observability::events::MemorySink;
    use crate::resilience::circuit_breaker::{BreakerConfig, BreakerStatus};
    use crate::resilience::classifier::ErrorCategory;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted outcomes; repeats the last one when the script runs out.
    struct Scripted {
        script: Mutex<VecDeque<Result<Response, Failure>>>,
        seen: Mutex<Vec<PreparedRequest>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<Response, Failure>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: PreparedRequest) -> Result<Response, Failure> {
            self.seen.lock().unwrap().push(request);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn client(transport: Arc<Scripted>, threshold: u32) -> (ServiceClient, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let options = ClientOptions {
            default_retry: RetryPolicy::default()
                .with_base_delay(Duration::from_millis(100))
                .with_jitter(0.0),
            ..ClientOptions::default()
        };
        let client = ServiceClient::new(transport, sink.clone(), options);
        client.register_service(
            ServiceDescriptor::new("geo", "http://geo.internal/")
                .unwrap()
                .with_breaker(BreakerConfig {
                    failure_threshold: threshold,
                    ..BreakerConfig::default()
                }),
        );
        (client, sink)
    }

    fn ok(body: &str) -> Result<Response, Failure> {
        Ok(Response::new(200, body))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success_records_once() {
        let transport = Scripted::new(vec![Ok(Response::new(503, "busy")), ok("fine")]);
        let (client, sink) = client(transport.clone(), 2);

        let resp = client.call("geo", RequestSpec::get("/lookup")).await.unwrap();
        assert_eq!(resp.text(), "fine");
        assert_eq!(transport.calls(), 2);
        assert_eq!(sink.count("call.attempt"), 2);
        assert_eq!(sink.count("call.completed"), 1);

        // the intermediate 503 never reached the breaker
        let status = client.breaker_status("geo").unwrap();
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_sequence_counts_one_failure() {
        let transport = Scripted::new(vec![Err(Failure::new("connection refused"))]);
        let (client, sink) = client(transport.clone(), 5);

        let err = client.call("geo", RequestSpec::get("/lookup")).await.unwrap_err();
        assert_eq!(err.category(), Some(ErrorCategory::Network));
        assert_eq!(transport.calls(), 3);
        assert_eq!(sink.count("call.exhausted"), 1);
        assert_eq!(client.breaker_status("geo").unwrap().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_short_circuits() {
        let transport = Scripted::new(vec![Ok(Response::new(401, "nope"))]);
        let (client, sink) = client(transport.clone(), 1);

        let err = client.call("geo", RequestSpec::get("/lookup")).await.unwrap_err();
        assert_eq!(err.category(), Some(ErrorCategory::Auth));
        assert_eq!(transport.calls(), 1);

        let err = client.call("geo", RequestSpec::get("/lookup")).await.unwrap_err();
        assert!(err.is_short_circuit());
        assert_eq!(transport.calls(), 1, "no transport attempt while open");
        assert_eq!(sink.count("call.shortCircuited"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_read_skips_transport() {
        let transport = Scripted::new(vec![ok("V")]);
        let (client, sink) = client(transport.clone(), 5);
        let spec = || RequestSpec::get("/rates?pair=eur-matic").cacheable(Some(Duration::from_secs(30)));

        assert_eq!(client.call("geo", spec()).await.unwrap().text(), "V");
        assert_eq!(client.call("geo", spec()).await.unwrap().text(), "V");
        assert_eq!(transport.calls(), 1);
        assert_eq!(sink.count("cache.hit"), 1);
        assert_eq!(sink.count("cache.miss"), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        client.call("geo", spec()).await.unwrap();
        assert_eq!(transport.calls(), 2, "expired entry refetched");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_served_while_breaker_open() {
        let transport = Scripted::new(vec![ok("V"), Err(Failure::new("connection reset"))]);
        let (client, _) = client(transport.clone(), 1);
        let cached = RequestSpec::get("/rates").cacheable(None);

        client.call("geo", cached.clone()).await.unwrap();
        client
            .call("geo", RequestSpec::get("/other").retry(RetryPolicy::none()))
            .await
            .unwrap_err();
        assert_eq!(client.breaker_status("geo").unwrap().status, BreakerStatus::Open);

        assert_eq!(client.call("geo", cached).await.unwrap().text(), "V");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refetch() {
        let transport = Scripted::new(vec![ok("V")]);
        let (client, _) = client(transport.clone(), 5);
        let spec = || RequestSpec::get("/rates").query("pair", "eur-matic").cacheable(None);

        client.call("geo", spec()).await.unwrap();
        assert_eq!(client.invalidate_cache("geo:/rates"), 1);
        client.call("geo", spec()).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_count_against_breaker() {
        let transport = Scripted::new(vec![Err(Failure::new("connection refused"))]);
        let (client, sink) = client(transport.clone(), 1);
        let source = CancelSource::new();
        let spec = RequestSpec::get("/lookup")
            .retry(RetryPolicy::default().with_base_delay(Duration::from_secs(10)).with_jitter(0.0))
            .cancel_with(source.token());

        let call = client.call("geo", spec);
        let cancel = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            source.cancel();
        };
        let (result, ()) = tokio::join!(call, cancel);

        assert!(matches!(result, Err(ClientError::Cancelled { attempts: 1, .. })));
        let status = client.breaker_status("geo").unwrap();
        assert_eq!(status.status, BreakerStatus::Closed);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(sink.count("call.completed"), 1);
    }

    struct Hanging;

    #[async_trait]
    impl Transport for Hanging {
        async fn send(&self, _request: PreparedRequest) -> Result<Response, Failure> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Response::new(200, ""))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_attempt_timeout() {
        let sink = Arc::new(MemorySink::new());
        let client = ServiceClient::new(Arc::new(Hanging), sink, ClientOptions::default());
        client.register_service(ServiceDescriptor::new("slow", "http://slow.internal/").unwrap());

        let err = client
            .call(
                "slow",
                RequestSpec::get("/").timeout(Duration::from_secs(1)).retry(RetryPolicy::none()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category(), Some(ErrorCategory::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_half_open_calls_free_their_slots() {
        let client = ServiceClient::new(Arc::new(Hanging), Arc::new(MemorySink::new()), ClientOptions::default());
        client.register_service(
            ServiceDescriptor::new("slow", "http://slow.internal/")
                .unwrap()
                .with_breaker(BreakerConfig {
                    failure_threshold: 1,
                    ..BreakerConfig::default()
                }),
        );
        client
            .run_guarded("slow", Some(&RetryPolicy::none()), None, || async {
                Err::<(), _>(Failure::new("connection refused"))
            })
            .await
            .unwrap_err();
        assert_eq!(client.breaker_status("slow").unwrap().status, BreakerStatus::Open);

        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..3 {
            let call = client.call("slow", RequestSpec::get("/").retry(RetryPolicy::none()));
            let abandoned = tokio::time::timeout(Duration::from_millis(10), call).await;
            assert!(abandoned.is_err(), "caller gave up before the transport answered");
        }

        tokio::time::advance(Duration::from_secs(3600)).await;
        let value = client
            .run_guarded("slow", None, None, || async { Ok::<_, Failure>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        let snapshot = client.breaker_status("slow").unwrap();
        assert_eq!(snapshot.status, BreakerStatus::HalfOpen);
        assert_eq!(snapshot.half_open_successes, 1);
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let transport = Scripted::new(vec![ok("")]);
        let (client, _) = client(transport.clone(), 5);
        let err = client.call("nope", RequestSpec::get("/")).await.unwrap_err();
        assert_eq!(err, ClientError::UnknownService("nope".into()));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_guarded_shares_breaker() {
        let transport = Scripted::new(vec![ok("")]);
        let (client, _) = client(transport, 2);

        for _ in 0..2 {
            let err = client
                .run_guarded("geo", Some(&RetryPolicy::none()), None, || async {
                    Err::<(), _>(Failure::new("script error").foreign())
                })
                .await
                .unwrap_err();
            assert_eq!(err.category(), Some(ErrorCategory::Incompatible));
        }

        let err = client
            .run_guarded("geo", None, None, || async { Ok::<_, Failure>(1) })
            .await
            .unwrap_err();
        assert!(err.is_short_circuit());

        let snapshot = client.reset_breaker("geo").unwrap();
        assert_eq!(snapshot.status, BreakerStatus::Closed);
        let value = client
            .run_guarded("geo", None, None, || async { Ok::<_, Failure>(1) })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_services_listing() {
        let transport = Scripted::new(vec![ok("")]);
        let (client, _) = client(transport, 5);
        let services = client.services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "geo");
        assert_eq!(services[0].breaker.status, BreakerStatus::Closed);
    }
}
