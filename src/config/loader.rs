//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<GuardConfig, ConfigError> {
    let config: GuardConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let config = parse_config(
            r#"
            [[services]]
            name = "geo"
            base_address = "http://geo.internal/"
            "#,
        )
        .unwrap();
        assert_eq!(config.services.len(), 1);
    }

    #[test]
    fn test_parse_reports_validation() {
        let err = parse_config(
            r#"
            [defaults.breaker]
            failure_threshold = 0
            half_open_quota = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(&err, ConfigError::Validation(errors) if errors.len() == 2));
        assert_eq!(
            err.to_string(),
            "Validation failed: defaults.breaker: failure_threshold must be greater than zero, \
             defaults.breaker: half_open_quota must be greater than zero"
        );
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(parse_config("[[services]"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/guard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
