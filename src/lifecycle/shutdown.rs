//! Shutdown coordination for the daemon.

use crate::lifecycle::cancel::{CancelSource, CancelToken};

/// Coordinator for graceful shutdown.
///
/// Every long-running task subscribes and exits once the signal fires.
pub struct Shutdown {
    source: CancelSource,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            source: CancelSource::new(),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> CancelToken {
        self.source.token()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.source.cancel();
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.source.token_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for Ctrl+C.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
