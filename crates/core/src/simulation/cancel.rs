//! Cooperative cancellation.

use crate::error::{RunError, RunResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag a caller raises to stop a run at its next checkpoint.
///
/// Clones share the same flag, so the caller keeps one and hands another to the run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Checkpoint: fails with [`RunError::CancelledByUser`] once the flag is raised.
    pub fn check(&self) -> RunResult<()> {
        if self.is_cancelled() {
            Err(RunError::CancelledByUser)
        } else {
            Ok(())
        }
    }
}
