//! Cancellable background task.
//!
//! Every timer the connector owns (push link, reconnect delay, demo generator,
//! pollers) runs as a spawned task paired with a oneshot shutdown channel. Cancelling
//! sends the shutdown signal and aborts the task, so a task parked inside a network
//! call stops at its next await point. Dropping a handle cancels it.

use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

/// Handle to one spawned background task.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn `body`, handing it the shutdown receiver.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(body(shutdown_rx));
        trace!(task = name, "Task spawned");
        Self {
            name,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(handle),
        }
    }

    /// True until cancelled or finished.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal shutdown and abort. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
            trace!(task = self.name, "Task cancelled");
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_the_loop() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let mut task = TaskHandle::spawn("ticker", move |mut shutdown_rx| async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(10));
            loop {
                tokio::select! {
                    _ = ticker.tick() => { counter.fetch_add(1, Ordering::SeqCst); }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        assert!(task.is_active());
        task.cancel();
        let seen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
        assert!(!task.is_active());
        task.cancel();
    }
}
