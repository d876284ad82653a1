//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! One call sequence:
//!     → circuit_breaker.rs (admit? one decision per sequence)
//!     → retries.rs (attempt loop)
//!         → timeouts.rs (per-attempt deadline)
//!         → classifier.rs (failure → category → retry decision)
//!         → backoff.rs (delay before the next attempt)
//!     → circuit_breaker.rs (record the sequence outcome)
//! ```
//!
//! # Design Decisions
//! - Every attempt has a deadline
//! - Only Network, Timeout and RateLimited failures are retried at full budget
//! - Breakers are per service and outlive configuration reloads

pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{Admission, BreakerConfig, BreakerSnapshot, BreakerStatus, CircuitBreaker};
pub use classifier::{classify, classify_record, ErrorCategory, ErrorRecord, Failure};
pub use retries::{Attempted, RetryError, RetryExecutor, RetryPolicy};
