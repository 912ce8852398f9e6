//! Per-request cancellation signal: a cancellation token plus an optional deadline.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation state observed by the dispatcher between pipeline steps.
///
/// The token fires on client disconnect or forced shutdown; the deadline
/// bounds total processing time. Either one counts as cancellation.
#[derive(Debug, Clone)]
pub struct RequestSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestSignal {
    #[must_use]
    pub fn new(token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { token, deadline }
    }

    /// Fresh signal with no deadline and nothing cancelling it.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    /// Sets the deadline to `now + timeout` unless an earlier one is set.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        });
        self
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the token fired or the deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves when the signal becomes cancelled.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_signal_is_live() {
        let signal = RequestSignal::unbounded();
        assert!(!signal.is_cancelled());
        assert!(signal.deadline().is_none());
    }

    #[test]
    fn cancel_fires_clones() {
        let signal = RequestSignal::unbounded();
        let clone = signal.clone();
        signal.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_counts_as_cancellation() {
        let signal = RequestSignal::unbounded().with_timeout(Duration::from_millis(100));
        assert!(!signal.is_cancelled());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(signal.is_cancelled());
        // Resolves immediately once the deadline has passed.
        signal.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_keeps_earlier_deadline() {
        let signal = RequestSignal::unbounded().with_timeout(Duration::from_millis(50));
        let first = signal.deadline().unwrap();
        let signal = signal.with_timeout(Duration::from_secs(5));
        assert_eq!(signal.deadline(), Some(first));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_on_parent_cancel() {
        let parent = CancellationToken::new();
        let signal = RequestSignal::new(parent.child_token(), None);
        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });
        parent.cancel();
        waiter.await.unwrap();
        assert!(signal.is_cancelled());
    }
}
