//! Delayed, restartable actions

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Runs an action once a burst of triggers has gone quiet
///
/// Arming cancels whatever was armed before, including an action that already started;
/// the action observes that through the token it is given.
pub struct Debouncer {
    pending: Mutex<Option<CancellationToken>>,
    task_tracker: TaskTracker,
}

impl Debouncer {
    /// Create an idle debouncer
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Run `action` after `delay` unless armed again or cancelled first
    pub fn arm<F, Fut>(&self, delay: Duration, action: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.pending.lock().replace(token.clone()) {
            previous.cancel();
        }

        self.task_tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            action(token).await;
        });
    }

    /// Cancel the armed action, if any
    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.cancel();
        }
    }

    /// Cancel and wait for every spawned action to finish
    pub async fn shutdown(&self) {
        self.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(
        counter: Arc<AtomicUsize>,
    ) -> impl FnOnce(CancellationToken) -> std::future::Ready<()> {
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_run() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            debouncer.arm(Duration::from_secs(3), counting(runs.clone()));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        debouncer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_run() {
        let debouncer = Debouncer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        debouncer.arm(Duration::from_secs(3), counting(runs.clone()));
        debouncer.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        debouncer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_cancels_running_action() {
        let debouncer = Debouncer::new();
        let (tx, rx) = flume::unbounded();

        let first = tx.clone();
        debouncer.arm(Duration::from_secs(1), move |token| async move {
            token.cancelled().await;
            let _ = first.send("first cancelled");
        });
        tokio::time::sleep(Duration::from_secs(2)).await;

        debouncer.arm(Duration::from_secs(1), move |_| async move {
            let _ = tx.send("second ran");
        });

        assert_eq!(rx.recv_async().await.unwrap(), "first cancelled");
        assert_eq!(rx.recv_async().await.unwrap(), "second ran");
        debouncer.shutdown().await;
    }
}
