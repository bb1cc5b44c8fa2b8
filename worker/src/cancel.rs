use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);

        Self {
            sender: Arc::new(sender),
        }
    }

    /// Raises the flag, returns false if it was already raised
    pub fn cancel(&self) -> bool {
        self.sender.send_if_modified(|cancelled| {
            if *cancelled {
                return false;
            }

            *cancelled = true;
            true
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once the flag is raised
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();

        // the sender lives as long as self, wait_for can't see a closed channel
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn cancel_wakes_every_clone() {
        let signal = CancelSignal::new();
        let observer = signal.clone();

        let waiter = tokio::spawn(async move { observer.cancelled().await });

        assert!(signal.cancel());
        assert!(!signal.cancel());

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter to be woken")
            .unwrap();
    }

    #[tokio::test]
    async fn already_raised_resolves_immediately() {
        let signal = CancelSignal::new();
        signal.cancel();

        timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("raised flag to resolve without waiting");

        assert!(signal.is_cancelled());
    }
}
