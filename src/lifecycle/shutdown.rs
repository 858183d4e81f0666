//! One-shot cooperative cancellation shared with background tasks.

use tokio_util::sync::CancellationToken;

/// Shutdown trigger for background tasks.
///
/// Every task holds a clone of the same token; triggering is one-way and
/// idempotent.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new, untriggered shutdown trigger.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token handed to a task that must stop on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("Cancelling background tasks");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_reaches_every_token() {
        let shutdown = Shutdown::new();
        let a = shutdown.token();
        let b = shutdown.clone().token();

        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        shutdown.trigger();

        a.cancelled().await;
        b.cancelled().await;
        assert!(shutdown.is_triggered());
    }
}
