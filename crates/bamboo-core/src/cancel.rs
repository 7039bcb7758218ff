//! Process-wide cancellation (§5 "Cancellation", §9 "Process-wide
//! cancellation", §10.5).
//!
//! A thin wrapper over `tokio_util::sync::CancellationToken`: passed by
//! reference into every long-lived worker rather than stored in a global,
//! per this specification's explicit design note.

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct Canceller {
    token: CancellationToken,
}

impl Canceller {
    pub fn new() -> Self {
        Self { token: CancellationToken::new() }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let c = Canceller::new();
        assert!(!c.is_cancelled());
        c.cancel();
        c.cancelled().await;
        assert!(c.is_cancelled());
    }
}
