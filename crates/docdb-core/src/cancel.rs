//! Cooperative cancellation
//!
//! Suspending operations check the flag at entry and before each
//! suspension point; a cancelled operation releases any held gate
//! before returning.

use crate::error::{DocDbError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for one logical operation
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Create a new, uncancelled flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Error if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DocDbError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::new();
        assert!(flag.check().is_ok());

        let clone = flag.clone();
        clone.cancel();

        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(DocDbError::Cancelled)));
    }
}
