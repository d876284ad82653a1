//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_call_attempts_total` (counter): attempts by service, outcome
//! - `guard_calls_total` (counter): logical calls by service, outcome
//! - `guard_call_duration_seconds` (histogram): call sequence latency
//! - `guard_cache_lookups_total` (counter): cache lookups by result
//! - `guard_cache_entries` (gauge): current cache size
//! - `guard_breaker_transitions_total` (counter): transitions by service, target state
//! - `guard_breaker_state` (gauge): 0=closed, 1=half-open, 2=open

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::observability::events::{AttemptOutcome, Event, EventSink};

/// Install the Prometheus recorder with an HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cache_size(entries: usize) {
    metrics::gauge!("guard_cache_entries").set(entries as f64);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("guard_cache_lookups_total", "result" => result).increment(1);
}

fn record_breaker_state(service: &str, state: &'static str, gauge: f64) {
    metrics::counter!(
        "guard_breaker_transitions_total",
        "service" => service.to_string(),
        "to" => state
    )
    .increment(1);
    metrics::gauge!("guard_breaker_state", "service" => service.to_string()).set(gauge);
}

/// Translates events into metric updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl EventSink for MetricsSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::BreakerClosed { service } => record_breaker_state(service, "closed", 0.0),
            Event::BreakerHalfOpen { service } => record_breaker_state(service, "half_open", 1.0),
            Event::BreakerOpened { service } => record_breaker_state(service, "open", 2.0),
            Event::CallAttempt { service, outcome, .. } => {
                let outcome = match outcome {
                    AttemptOutcome::Success => "success",
                    AttemptOutcome::Failed { category } => category.as_str(),
                };
                metrics::counter!(
                    "guard_call_attempts_total",
                    "service" => service.to_string(),
                    "outcome" => outcome
                )
                .increment(1);
            }
            Event::CallCompleted { service, duration_ms, outcome, .. } => {
                metrics::counter!(
                    "guard_calls_total",
                    "service" => service.to_string(),
                    "outcome" => outcome.label()
                )
                .increment(1);
                metrics::histogram!("guard_call_duration_seconds", "service" => service.to_string())
                    .record(*duration_ms as f64 / 1000.0);
            }
            Event::CacheHit { .. } => record_cache_lookup(true),
            Event::CacheMiss { .. } => record_cache_lookup(false),
            Event::CallExhausted { .. } | Event::CallShortCircuited { .. } => {}
        }
    }
}
