//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, jitter in [0, 1), multiplier >= 1)
//! - Reject unparsable addresses and duplicate service names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: GuardConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{BreakerSettings, GuardConfig, RetryConfig, DEFAULT_API_KEY};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{scope}: {field} must be greater than zero")]
    Zero { scope: String, field: &'static str },

    #[error("{scope}: backoff_multiplier must be at least 1.0, got {value}")]
    Multiplier { scope: String, value: f64 },

    #[error("{scope}: jitter must be in [0, 1), got {value}")]
    Jitter { scope: String, value: f64 },

    #[error("service at index {0} has no name")]
    EmptyServiceName(usize),

    #[error("service '{0}' is defined more than once")]
    DuplicateService(String),

    #[error("service '{service}': invalid base_address '{address}': {reason}")]
    BaseAddress {
        service: String,
        address: String,
        reason: String,
    },

    #[error("{section}: invalid bind address '{value}'")]
    BindAddress { section: &'static str, value: String },

    #[error("admin: api_key must be changed from the placeholder when admin is enabled")]
    PlaceholderApiKey,
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_retry("defaults.retry", &config.defaults.retry, &mut errors);
    check_breaker("defaults.breaker", &config.defaults.breaker, &mut errors);
    if config.defaults.timeout_ms == 0 {
        errors.push(zero("defaults", "timeout_ms"));
    }
    if config.cache.max_entries == 0 {
        errors.push(zero("cache", "max_entries"));
    }
    if config.cache.sweep_interval_secs == 0 {
        errors.push(zero("cache", "sweep_interval_secs"));
    }

    if config.observability.metrics_enabled {
        check_bind("observability", &config.observability.metrics_address, &mut errors);
    }
    if config.gateway.enabled {
        check_bind("gateway", &config.gateway.bind_address, &mut errors);
    }
    if config.admin.enabled {
        check_bind("admin", &config.admin.bind_address, &mut errors);
        if config.admin.api_key == DEFAULT_API_KEY || config.admin.api_key.is_empty() {
            errors.push(ValidationError::PlaceholderApiKey);
        }
    }

    let mut seen = HashSet::new();
    for (index, service) in config.services.iter().enumerate() {
        if service.name.is_empty() {
            errors.push(ValidationError::EmptyServiceName(index));
            continue;
        }
        if !seen.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }

        let scope = format!("services.{}", service.name);
        if let Err(e) = url::Url::parse(&service.base_address) {
            errors.push(ValidationError::BaseAddress {
                service: service.name.clone(),
                address: service.base_address.clone(),
                reason: e.to_string(),
            });
        }
        if service.timeout_ms == Some(0) {
            errors.push(zero(&scope, "timeout_ms"));
        }
        if let Some(retry) = &service.retry {
            check_retry(&format!("{scope}.retry"), retry, &mut errors);
        }
        if let Some(breaker) = &service.breaker {
            check_breaker(&format!("{scope}.breaker"), breaker, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn zero(scope: &str, field: &'static str) -> ValidationError {
    ValidationError::Zero {
        scope: scope.to_string(),
        field,
    }
}

fn check_retry(scope: &str, retry: &RetryConfig, errors: &mut Vec<ValidationError>) {
    if retry.max_attempts == 0 {
        errors.push(zero(scope, "max_attempts"));
    }
    if retry.max_retry_after_ms == 0 {
        errors.push(zero(scope, "max_retry_after_ms"));
    }
    if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
        errors.push(ValidationError::Multiplier {
            scope: scope.to_string(),
            value: retry.backoff_multiplier,
        });
    }
    if !(0.0..1.0).contains(&retry.jitter) {
        errors.push(ValidationError::Jitter {
            scope: scope.to_string(),
            value: retry.jitter,
        });
    }
}

fn check_breaker(scope: &str, breaker: &BreakerSettings, errors: &mut Vec<ValidationError>) {
    if breaker.failure_threshold == 0 {
        errors.push(zero(scope, "failure_threshold"));
    }
    if breaker.half_open_quota == 0 {
        errors.push(zero(scope, "half_open_quota"));
    }
    if breaker.reset_timeout_ms == 0 {
        errors.push(zero(scope, "reset_timeout_ms"));
    }
}

fn check_bind(section: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress {
            section,
            value: value.to_string(),
        });
    }
}
