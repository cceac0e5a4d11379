//! Cooperative cancellation for in-flight blueprint generation.

use crate::error::{BlueprintError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Caller-held token checked at pipeline stage boundaries.
///
/// Clones share the flag; firing it makes the running `generate` return
/// `Cancelled` at its next checkpoint and release its working buffers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    fired: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.fired.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stage-boundary check.
    pub(crate) fn checkpoint(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            Err(BlueprintError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}
