//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, executor, cache, client produce:
//!     → events.rs (typed Event values through an injected EventSink)
//!
//! Sinks:
//!     → TracingSink  → logging.rs subscriber (pretty or JSON)
//!     → MetricsSink  → metrics.rs (Prometheus scrape endpoint)
//!     → ChannelSink / MemorySink for embedding applications and tests
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Call ID flows through the call span
//! - Metrics are cheap (atomic increments)

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{
    AttemptOutcome, CallOutcome, ChannelSink, Event, EventSink, FanoutSink, MemorySink, NoopSink,
    SharedSink, TracingSink,
};
pub use metrics::MetricsSink;
