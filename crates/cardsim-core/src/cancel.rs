//! Explicit cancellation token.
//!
//! Suspended protocol operations race their await against
//! [`CancelToken::cancelled`]. Once cancelled a token stays cancelled; a
//! restarted component takes a fresh token.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared, clonable cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self { flag: Arc::new(flag) }
    }

    /// Cancel every holder of this token. Idempotent.
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves when the token is cancelled (immediately if it already is).
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives as long as `self`, so this only errors if it was
        // dropped, which cannot happen while we hold the Arc.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());

        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_is_immediate_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }
}
