//! Cooperative cancellation for panel runs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Signals that a run should stop
///
/// Clones share the same underlying token. Signalling is idempotent for
/// observers; `signal_count` records how many times it was requested.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    signals: Arc<AtomicUsize>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.signals.fetch_add(1, Ordering::SeqCst);
        self.token.cancel();
    }

    pub fn is_signalled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.load(Ordering::SeqCst)
    }

    /// Resolves once the handle is signalled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Token for handing to code that only understands `CancellationToken`
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_is_shared_between_clones() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_signalled());

        handle.signal();
        assert!(clone.is_signalled());
        assert_eq!(clone.signal_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_resolves() {
        let handle = CancelHandle::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.cancelled().await })
        };
        handle.signal();
        waiter.await.unwrap();
        assert!(handle.token().is_cancelled());
    }
}
