//! Typed lifecycle events and the sinks that consume them.
//!
//! # Responsibilities
//! - Define every event the call subsystem emits
//! - Provide the `EventSink` seam injected into breakers, executors and caches
//! - Ship sinks for logging, channels, in-memory capture and fan-out
//!
//! Emission is fire-and-forget: sinks must not block and never fail the caller.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use crate::resilience::classifier::{ErrorCategory, ErrorRecord};

/// Result of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failed { category: ErrorCategory },
}

/// Final result of a logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    CacheHit,
    ShortCircuited,
    Cancelled,
    Failed { category: ErrorCategory },
}

impl CallOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::CacheHit => "cache_hit",
            CallOutcome::ShortCircuited => "short_circuited",
            CallOutcome::Cancelled => "cancelled",
            CallOutcome::Failed { category } => category.as_str(),
        }
    }
}

/// An observability event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum Event {
    #[serde(rename = "breaker.opened")]
    BreakerOpened { service: String },

    #[serde(rename = "breaker.halfOpen")]
    BreakerHalfOpen { service: String },

    #[serde(rename = "breaker.closed")]
    BreakerClosed { service: String },

    #[serde(rename = "call.attempt")]
    CallAttempt {
        service: String,
        attempt: u32,
        outcome: AttemptOutcome,
        duration_ms: u64,
    },

    #[serde(rename = "call.exhausted")]
    CallExhausted {
        service: String,
        attempts: u32,
        last_error: ErrorRecord,
    },

    #[serde(rename = "call.shortCircuited")]
    CallShortCircuited { service: String },

    #[serde(rename = "call.completed")]
    CallCompleted {
        service: String,
        attempts: u32,
        duration_ms: u64,
        outcome: CallOutcome,
    },

    #[serde(rename = "cache.hit")]
    CacheHit { key: String },

    #[serde(rename = "cache.miss")]
    CacheMiss { key: String },
}

impl Event {
    /// Wire name of the event, e.g. `breaker.opened`.
    pub fn name(&self) -> &'static str {
        match self {
            Event::BreakerOpened { .. } => "breaker.opened",
            Event::BreakerHalfOpen { .. } => "breaker.halfOpen",
            Event::BreakerClosed { .. } => "breaker.closed",
            Event::CallAttempt { .. } => "call.attempt",
            Event::CallExhausted { .. } => "call.exhausted",
            Event::CallShortCircuited { .. } => "call.shortCircuited",
            Event::CallCompleted { .. } => "call.completed",
            Event::CacheHit { .. } => "cache.hit",
            Event::CacheMiss { .. } => "cache.miss",
        }
    }
}

/// Consumer of events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

pub type SharedSink = Arc<dyn EventSink>;

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &Event) {}
}

/// Renders events as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::BreakerOpened { service } => {
                tracing::warn!(service = %service, "Circuit breaker opened");
            }
            Event::BreakerHalfOpen { service } => {
                tracing::info!(service = %service, "Circuit breaker half-open, probing");
            }
            Event::BreakerClosed { service } => {
                tracing::info!(service = %service, "Circuit breaker closed");
            }
            Event::CallAttempt { service, attempt, outcome, duration_ms } => {
                tracing::debug!(
                    service = %service,
                    attempt = attempt,
                    outcome = ?outcome,
                    duration_ms = duration_ms,
                    "Call attempt finished"
                );
            }
            Event::CallExhausted { service, attempts, last_error } => {
                tracing::warn!(
                    service = %service,
                    attempts = attempts,
                    category = %last_error.category,
                    error = %last_error.message,
                    "Retries exhausted"
                );
            }
            Event::CallShortCircuited { service } => {
                tracing::warn!(service = %service, "Call short-circuited by open breaker");
            }
            Event::CallCompleted { service, attempts, duration_ms, outcome } => {
                tracing::info!(
                    service = %service,
                    attempts = attempts,
                    duration_ms = duration_ms,
                    outcome = outcome.label(),
                    "Call completed"
                );
            }
            Event::CacheHit { key } => tracing::debug!(key = %key, "Cache hit"),
            Event::CacheMiss { key } => tracing::debug!(key = %key, "Cache miss"),
        }
    }
}

/// Forwards events over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &Event) {
        // receiver gone: drop the event
        let _ = self.tx.send(event.clone());
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of captured events with the given wire name.
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Delivers each event to several sinks in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<SharedSink>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<SharedSink>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: SharedSink) {
        self.sinks.push(sink);
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &Event) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
