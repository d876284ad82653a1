//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Process shutdown (shutdown.rs):
//!     Ctrl+C received → Shutdown::trigger
//!     → admin/gateway servers drain
//!     → cache sweeper and reload loop exit
//!
//! Call cancellation (cancel.rs):
//!     CancelSource::cancel
//!     → every CancelToken observes it
//!     → in-flight call sequences abort between attempts or mid-backoff
//! ```
//!
//! # Design Decisions
//! - Shutdown and per-call cancellation share one primitive
//! - Cancellation is a level: tokens created after `cancel` observe it

pub mod cancel;
pub mod shutdown;

pub use cancel::{CancelSource, CancelToken};
pub use shutdown::Shutdown;
