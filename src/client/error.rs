//! Errors surfaced by `ServiceClient`.

use std::time::Duration;
use thiserror::Error;

use crate::resilience::classifier::{ErrorCategory, ErrorRecord};
use crate::resilience::retries::RetryError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("service '{0}' is not registered")]
    UnknownService(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Short-circuited locally; no transport attempt was made.
    #[error("circuit breaker open for service '{service}'")]
    BreakerOpen { service: String },

    /// Terminal classified failure (non-retryable or retries exhausted).
    #[error("{category} failure from '{service}' after {attempts} attempt(s): {message}")]
    Transport {
        service: String,
        category: ErrorCategory,
        http_status: Option<u16>,
        message: String,
        attempts: u32,
        retry_after_hint: Option<Duration>,
    },

    #[error("call to '{service}' cancelled after {attempts} attempt(s)")]
    Cancelled { service: String, attempts: u32 },
}

impl ClientError {
    pub(crate) fn from_record(service: &str, error: ErrorRecord, attempts: u32) -> Self {
        ClientError::Transport {
            service: service.to_string(),
            category: error.category,
            http_status: error.http_status,
            message: error.message,
            attempts,
            retry_after_hint: error.retry_after_hint,
        }
    }

    pub(crate) fn from_retry(service: &str, error: RetryError) -> Self {
        match error {
            RetryError::Permanent { error, attempts } | RetryError::Exhausted { error, attempts } => {
                Self::from_record(service, error, attempts)
            }
            RetryError::Cancelled { attempts, .. } => ClientError::Cancelled {
                service: service.to_string(),
                attempts,
            },
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            ClientError::Transport { category, .. } => Some(*category),
            _ => None,
        }
    }

    /// True when the caller should fall back instead of retrying.
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, ClientError::BreakerOpen { .. })
    }
}
