//! Failure classification.
//!
//! # Responsibilities
//! - Map a raw failure (message, status, metadata) to an `ErrorCategory`
//! - Decide retry eligibility per category
//! - Carry the transport's retry-after hint for throttled calls
//!
//! # Rules (first match wins)
//! ```text
//! foreign origin                   → Incompatible
//! status 5xx                       → Network
//! status 429                       → RateLimited
//! status 401 / 403                 → Auth
//! status 408                       → Timeout
//! status 400 / 422                 → Validation
//! network vocabulary               → Network
//! timeout vocabulary               → Timeout
//! throttling vocabulary            → RateLimited
//! auth vocabulary                  → Auth
//! malformed-input vocabulary       → Validation
//! anything else                    → Unknown
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const NETWORK_TERMS: &[&str] = &[
    "network",
    "connection refused",
    "connection reset",
    "connection closed",
    "connection failed",
    "connection aborted",
    "econnrefused",
    "econnreset",
    "broken pipe",
    "dns",
    "unreachable",
    "failed to fetch",
];

const TIMEOUT_TERMS: &[&str] = &["timeout", "timed out", "deadline"];

const THROTTLE_TERMS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "too many requests",
    "throttl",
    "quota exceeded",
];

const AUTH_TERMS: &[&str] = &["unauthorized", "unauthorised", "forbidden", "not authenticated"];

const VALIDATION_TERMS: &[&str] = &[
    "invalid",
    "malformed",
    "missing required",
    "validation",
    "bad request",
];

/// Failure category. Determines retry eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimited,
    Auth,
    Validation,
    Incompatible,
    Unknown,
}

impl ErrorCategory {
    /// Network, Timeout and RateLimited are retried up to the policy limit.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::RateLimited
        )
    }

    /// Upper bound on attempts this category allows, regardless of policy.
    ///
    /// `None` means the policy decides.
    pub fn attempt_cap(self) -> Option<u32> {
        match self {
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::RateLimited => None,
            ErrorCategory::Unknown => Some(2),
            ErrorCategory::Auth | ErrorCategory::Validation | ErrorCategory::Incompatible => {
                Some(1)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Incompatible => "incompatible",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw failure as reported by a transport or an operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Failure {
    pub message: String,
    pub status: Option<u16>,
    pub retry_after: Option<Duration>,
    /// The failure originated in foreign or untrusted code.
    pub foreign: bool,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, hint: Duration) -> Self {
        self.retry_after = Some(hint);
        self
    }

    pub fn foreign(mut self) -> Self {
        self.foreign = true;
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {})", self.message, status),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for Failure {}

impl From<std::io::Error> for Failure {
    fn from(e: std::io::Error) -> Self {
        Failure::new(e.to_string())
    }
}

/// A classified failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub message: String,
    pub http_status: Option<u16>,
    pub retry_after_hint: Option<Duration>,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Classify a failure. Total: always returns a category.
pub fn classify(failure: &Failure) -> ErrorCategory {
    if failure.foreign {
        return ErrorCategory::Incompatible;
    }

    if let Some(category) = failure.status.and_then(classify_status) {
        return category;
    }

    let message = failure.message.to_ascii_lowercase();
    let mentions = |terms: &[&str]| terms.iter().any(|t| message.contains(t));

    if mentions(NETWORK_TERMS) {
        ErrorCategory::Network
    } else if mentions(TIMEOUT_TERMS) {
        ErrorCategory::Timeout
    } else if mentions(THROTTLE_TERMS) {
        ErrorCategory::RateLimited
    } else if mentions(AUTH_TERMS) {
        ErrorCategory::Auth
    } else if mentions(VALIDATION_TERMS) {
        ErrorCategory::Validation
    } else {
        ErrorCategory::Unknown
    }
}

fn classify_status(status: u16) -> Option<ErrorCategory> {
    match status {
        500..=599 => Some(ErrorCategory::Network),
        429 => Some(ErrorCategory::RateLimited),
        401 | 403 => Some(ErrorCategory::Auth),
        408 => Some(ErrorCategory::Timeout),
        400 | 422 => Some(ErrorCategory::Validation),
        _ => None,
    }
}

/// Classify a failure into a full record.
///
/// The retry-after hint is kept only for rate-limited failures.
pub fn classify_record(failure: &Failure) -> ErrorRecord {
    let category = classify(failure);
    ErrorRecord {
        category,
        message: failure.message.clone(),
        http_status: failure.status,
        retry_after_hint: match category {
            ErrorCategory::RateLimited => failure.retry_after,
            _ => None,
        },
    }
}
