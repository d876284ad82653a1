//! Resilient remote-call library: classified retries, per-service circuit
//! breakers and a TTL response cache behind one `ServiceClient`.

pub mod admin;
pub mod cache;
pub mod client;
pub mod config;
pub mod gateway;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use client::{ClientError, RequestSpec, Response, ServiceClient, ServiceDescriptor};
pub use config::schema::GuardConfig;
pub use lifecycle::Shutdown;
