//! Task coordination for one worker
//!
//! Every task that belongs to a worker is spawned through its [`Graceful`],
//! so stopping the worker can cancel them together and then wait until the
//! last one has actually returned.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::errors::DrainTimeout;

#[derive(Debug, Clone, Default)]
pub struct Graceful {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Graceful {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task that shutdown will wait for
    pub fn spawn<F>(&self, task: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Number of tracked tasks that have not returned yet
    pub fn task_count(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting new tasks and wait for the tracked ones to finish
    ///
    /// Does not cancel by itself: callers cancel first, then drain.
    pub async fn drain(&self, timeout: Duration) -> Result<(), DrainTimeout> {
        self.tracker.close();
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(DrainTimeout {
                remaining: self.tracker.len(),
                after: timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_waits_for_cancelled_tasks() {
        let graceful = Graceful::new();

        for _ in 0..3 {
            let g = graceful.clone();
            graceful.spawn(async move { g.cancelled().await });
        }
        assert_eq!(graceful.task_count(), 3);

        graceful.cancel();
        graceful.drain(Duration::from_secs(1)).await.unwrap();
        assert_eq!(graceful.task_count(), 0);
        assert!(graceful.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_on_stuck_task() {
        let graceful = Graceful::new();
        graceful.spawn(std::future::pending::<()>());

        let err = graceful.drain(Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(err.remaining, 1);
    }
}
