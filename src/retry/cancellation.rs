use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation flag shared between a running task and whoever
/// may cancel it. Clones observe the same flag; once fired it stays fired.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Fire the signal. Returns `true` if this call did the firing.
    pub fn cancel(&self) -> bool {
        !self.sender.send_replace(true)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once the signal has fired
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            // The sender lives as long as `self`, so this cannot fail while we wait
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_sticky_and_shared() {
        let signal = CancellationSignal::new();
        let observer = signal.clone();

        assert!(!observer.is_cancelled());
        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(observer.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let signal = CancellationSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_fired() {
        let signal = CancellationSignal::new();
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(50), signal.cancelled())
            .await
            .expect("already-fired signal should resolve");
    }
}
