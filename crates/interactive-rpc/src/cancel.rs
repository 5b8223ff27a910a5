//! Cooperative cancellation for background loops.
//!
//! Used by the clock-sync sampler: `stop()` cancels the token, and a sample that
//! resolves afterwards sees the cancellation and is discarded instead of
//! being recorded into a freshly cleared history.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation token shared between an owner and its background task.
///
/// Cloning shares state: cancelling any clone is observed by all of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check cancellation and return an error if cancelled.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::SocketError::Cancelled)
        } else {
            Ok(())
        }
    }
}
