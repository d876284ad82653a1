//! Retry logic.
//!
//! # Responsibilities
//! - Drive "attempt, classify, maybe wait, attempt again" for any operation
//! - Stop on non-retryable categories and when attempts are exhausted
//! - Honor retry-after hints from throttled calls, otherwise back off exponentially
//! - Abort cooperatively on cancellation, including mid-backoff
//!
//! # Design Decisions
//! - One executor shared by HTTP calls and generic guarded operations
//! - Jittered backoff (±20% by default); retry-after hints are used exactly, up to `max_retry_after`
//! - Auth and Validation are never retried; Unknown at most once
//! - The executor never touches breaker state; callers record the terminal outcome

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::lifecycle::cancel::CancelToken;
use crate::observability::events::{AttemptOutcome, Event, SharedSink};
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::classifier::{classify_record, ErrorRecord, Failure};

/// How a call sequence retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the computed delay used as ± jitter.
    pub jitter: f64,
    /// Ceiling on server-supplied retry-after hints.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            max_retry_after: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_retry_after(mut self, max_retry_after: Duration) -> Self {
        self.max_retry_after = max_retry_after;
        self
    }
}

/// Successful result with the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Terminal failure of a call sequence.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryError {
    /// The category is never retried.
    #[error("non-retryable failure after {attempts} attempt(s): {error}")]
    Permanent { error: ErrorRecord, attempts: u32 },

    /// Every allowed attempt failed.
    #[error("retries exhausted after {attempts} attempt(s): {error}")]
    Exhausted { error: ErrorRecord, attempts: u32 },

    /// Cancelled before the sequence finished.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled {
        attempts: u32,
        last_error: Option<ErrorRecord>,
    },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// The classified failure that ended the sequence, if any.
    pub fn error(&self) -> Option<&ErrorRecord> {
        match self {
            RetryError::Permanent { error, .. } | RetryError::Exhausted { error, .. } => Some(error),
            RetryError::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }
}

/// Per-sequence bookkeeping.
#[derive(Debug)]
pub struct RetryContext {
    pub attempt: u32,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub last_error: Option<ErrorRecord>,
}

#[derive(Debug, PartialEq)]
enum Decision {
    Retry(Duration),
    GiveUp,
    Exhausted,
}

impl RetryContext {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 1,
            max_attempts: policy.max_attempts.max(1),
            base_delay: policy.base_delay,
            last_error: None,
        }
    }

    fn decide(&self, policy: &RetryPolicy, error: &ErrorRecord) -> Decision {
        if !error.category.is_retryable() && error.category.attempt_cap() == Some(1) {
            return Decision::GiveUp;
        }

        let cap = error
            .category
            .attempt_cap()
            .map_or(self.max_attempts, |cap| cap.min(self.max_attempts));
        if self.attempt >= cap {
            return Decision::Exhausted;
        }

        let delay = match error.retry_after_hint {
            Some(hint) => hint.min(policy.max_retry_after),
            None => calculate_backoff(
                self.attempt,
                self.base_delay,
                policy.backoff_multiplier,
                policy.max_delay,
                policy.jitter,
            ),
        };
        Decision::Retry(delay)
    }
}

/// Runs operations under a retry policy.
#[derive(Clone)]
pub struct RetryExecutor {
    sink: SharedSink,
}

impl RetryExecutor {
    pub fn new(sink: SharedSink) -> Self {
        Self { sink }
    }

    /// Run `op` until it succeeds, fails permanently, exhausts the policy or is cancelled.
    ///
    /// `scope` names the call target in emitted events.
    pub async fn run<T, F, Fut>(
        &self,
        scope: &str,
        policy: &RetryPolicy,
        cancel: Option<&CancelToken>,
        mut op: F,
    ) -> Result<Attempted<T>, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let mut ctx = RetryContext::new(policy);

        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(RetryError::Cancelled {
                    attempts: ctx.attempt - 1,
                    last_error: ctx.last_error,
                });
            }

            let started = Instant::now();
            let result = match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    result = op() => Some(result),
                },
                None => Some(op().await),
            };
            let duration_ms = elapsed_ms(started);

            let Some(result) = result else {
                tracing::debug!(scope = %scope, attempt = ctx.attempt, "Attempt cancelled in flight");
                return Err(RetryError::Cancelled {
                    attempts: ctx.attempt,
                    last_error: ctx.last_error,
                });
            };

            let failure = match result {
                Ok(value) => {
                    self.emit_attempt(scope, ctx.attempt, AttemptOutcome::Success, duration_ms);
                    return Ok(Attempted {
                        value,
                        attempts: ctx.attempt,
                    });
                }
                Err(failure) => failure,
            };

            let error = classify_record(&failure);
            self.emit_attempt(
                scope,
                ctx.attempt,
                AttemptOutcome::Failed {
                    category: error.category,
                },
                duration_ms,
            );

            let delay = match ctx.decide(policy, &error) {
                Decision::Retry(delay) => delay,
                Decision::GiveUp => {
                    tracing::debug!(
                        scope = %scope,
                        attempt = ctx.attempt,
                        category = %error.category,
                        "Failure is not retryable"
                    );
                    return Err(RetryError::Permanent {
                        error,
                        attempts: ctx.attempt,
                    });
                }
                Decision::Exhausted => {
                    self.sink.emit(&Event::CallExhausted {
                        service: scope.to_string(),
                        attempts: ctx.attempt,
                        last_error: error.clone(),
                    });
                    return Err(RetryError::Exhausted {
                        error,
                        attempts: ctx.attempt,
                    });
                }
            };

            tracing::info!(
                scope = %scope,
                attempt = ctx.attempt,
                delay = ?delay,
                category = %error.category,
                "Retrying after failure"
            );
            ctx.last_error = Some(error);

            if let Some(token) = cancel {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return Err(RetryError::Cancelled {
                            attempts: ctx.attempt,
                            last_error: ctx.last_error,
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            } else {
                tokio::time::sleep(delay).await;
            }

            ctx.attempt += 1;
        }
    }

    fn emit_attempt(&self, scope: &str, attempt: u32, outcome: AttemptOutcome, duration_ms: u64) {
        self.sink.emit(&Event::CallAttempt {
            service: scope.to_string(),
            attempt,
            outcome,
            duration_ms,
        });
    }
}

pub(crate) fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
