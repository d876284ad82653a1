//! Response caching subsystem.
//!
//! # Data Flow
//! ```text
//! Cacheable call:
//!     key.rs (service + path + canonical parameters → key)
//!     → store.rs lookup (expired entries dropped on read)
//!     → hit: returned without touching the breaker or transport
//!     → miss: call proceeds, success is stored with a TTL
//!
//! Write path / admin:
//!     invalidate(prefix) removes every key under a service/path prefix
//! ```
//!
//! # Design Decisions
//! - In-memory only, process lifetime
//! - Size-bounded; over the bound, the entry expiring soonest goes first
//! - Concurrent reads, writes serialized per shard (DashMap)

pub mod key;
pub mod store;

pub use key::CacheKey;
pub use store::{CacheEntry, CacheStats, ResponseCache};
