//! Per-attempt timeout enforcement.
//!
//! # Responsibilities
//! - Wrap a single attempt with a deadline
//! - Turn an elapsed deadline into a `Failure` the classifier reads as Timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the attempt future is dropped on expiry
//! - Deadlines apply to one attempt, never to a whole call sequence

use std::future::Future;
use std::time::Duration;

use crate::resilience::classifier::Failure;

/// Run `attempt`, failing with a timeout `Failure` once `limit` elapses.
pub async fn with_timeout<T, Fut>(limit: Duration, attempt: Fut) -> Result<T, Failure>
where
    Fut: Future<Output = Result<T, Failure>>,
{
    match tokio::time::timeout(limit, attempt).await {
        Ok(result) => result,
        Err(_) => Err(Failure::new(format!(
            "attempt timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
