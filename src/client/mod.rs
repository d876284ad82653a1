//! Service client subsystem.
//!
//! # Data Flow
//! ```text
//! Caller:
//!     → registry.rs (service name → descriptor + breaker)
//!     → request.rs (RequestSpec resolved against the descriptor)
//!     → service.rs (cache → breaker → retries → transport)
//!     → transport.rs (one attempt of I/O through the Transport seam)
//!     → error.rs (terminal outcome reported as ClientError)
//! ```
//!
//! # Design Decisions
//! - One breaker per service, created at first registration
//! - The breaker observes call sequences, never individual attempts
//! - Transport is a trait object so tests inject scripted backends

pub mod error;
pub mod registry;
pub mod request;
pub mod service;
pub mod transport;

pub use error::ClientError;
pub use registry::{Registration, ServiceDescriptor, ServiceEntry, ServiceRegistry};
pub use request::{Method, RequestSpec, Response};
pub use service::{ClientOptions, ServiceClient, ServiceStatus};
pub use transport::{HttpTransport, PreparedRequest, ResolveError, Transport};
