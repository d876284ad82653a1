//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → descriptors registered on the ServiceClient
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads and validates
//!     → daemon re-registers services (breaker state survives)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Listener addresses and observability settings apply at startup only

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{GuardConfig, ServiceConfig};
pub use validation::ValidationError;
