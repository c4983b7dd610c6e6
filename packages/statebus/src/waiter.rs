//! Single-resolution waits over the aggregator's streams.
//!
//! A wait subscribes to one kind, replays the current snapshot through its
//! predicate (so a record that arrived before the wait still resolves it),
//! then evaluates every live update until the predicate returns a
//! non-pending verdict. The returned [`WaitHandle`] resolves exactly once;
//! cancellation tears the subscription down without resolving.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::aggregator::{StateAggregator, StateUpdate};
use crate::model::{CorrelationKey, StateKind};

/// Predicate verdict over a state update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not the update we are waiting for; keep watching.
    Pending,
    Success,
    Failure,
}

/// Error surfaced to the owner of a cancelled or torn-down wait.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    /// The wait was cancelled (or the waiter shut down) before any update
    /// satisfied the predicate. Neither success nor failure.
    #[error("wait cancelled before resolution")]
    Cancelled,
}

/// Spawns and tracks correlation waits against one aggregator.
///
/// Dependency-injected alongside the aggregator; owns a registry of live
/// waits so [`Self::shutdown`] can drain every subscription.
///
/// # Example
///
/// ```ignore
/// let waiter = CorrelationWaiter::new(aggregator.clone());
/// let mut handle = waiter.wait_until(StateKind::Task, "task:abc".into(), |update| {
///     match update.payload.as_task() {
///         Some(task) if task.booking.id == "abc" => Verdict::Success,
///         _ => Verdict::Pending,
///     }
/// });
/// let verdict = handle.outcome().await?;
/// ```
pub struct CorrelationWaiter {
    aggregator: Arc<StateAggregator>,
    live: Arc<DashMap<CorrelationKey, Arc<Notify>>>,
}

impl CorrelationWaiter {
    pub fn new(aggregator: Arc<StateAggregator>) -> Self {
        Self {
            aggregator,
            live: Arc::new(DashMap::new()),
        }
    }

    /// Start watching `kind` until `predicate` returns a non-pending
    /// verdict for some update.
    ///
    /// The correlation key scopes exactly one outstanding wait; uniqueness
    /// is the caller's responsibility. The predicate must be cheap and
    /// side-effect free: it runs on every update of the kind, including a
    /// replay of records already held at subscribe time.
    pub fn wait_until<F>(&self, kind: StateKind, key: CorrelationKey, predicate: F) -> WaitHandle
    where
        F: Fn(&StateUpdate) -> Verdict + Send + Sync + 'static,
    {
        let (resolve_tx, resolve_rx) = oneshot::channel();
        let cancel = Arc::new(Notify::new());
        self.live.insert(key.clone(), cancel.clone());

        let aggregator = self.aggregator.clone();
        let live = self.live.clone();
        let task_key = key.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let verdict = watch(aggregator, kind, &task_key, predicate, &task_cancel).await;
            live.remove(&task_key);
            if let Some(verdict) = verdict {
                // The handle may already be gone; that just means nobody
                // is interested in the verdict any more.
                let _ = resolve_tx.send(verdict);
            }
        });

        WaitHandle {
            key,
            resolve: resolve_rx,
            cancel,
        }
    }

    /// Number of waits currently subscribed.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Cancel every live wait. Part of process shutdown: after this call
    /// all outstanding [`WaitHandle::outcome`] futures report
    /// [`WaitError::Cancelled`].
    pub fn shutdown(&self) {
        for entry in self.live.iter() {
            entry.value().notify_one();
        }
    }
}

impl std::fmt::Debug for CorrelationWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationWaiter")
            .field("live", &self.live.len())
            .finish_non_exhaustive()
    }
}

/// Watch loop: subscribe, replay snapshot, then follow live updates.
/// Returns `None` when cancelled or when the aggregator is gone.
async fn watch<F>(
    aggregator: Arc<StateAggregator>,
    kind: StateKind,
    key: &CorrelationKey,
    predicate: F,
    cancel: &Notify,
) -> Option<Verdict>
where
    F: Fn(&StateUpdate) -> Verdict + Send + Sync + 'static,
{
    // Subscribe before replaying so no update can fall between snapshot
    // and subscription. A record updated right now may be seen twice.
    let mut rx = aggregator.subscribe(kind);

    for existing in aggregator.snapshot(kind) {
        match predicate(&existing) {
            Verdict::Pending => {}
            verdict => {
                debug!(key = %key, ?verdict, "wait resolved from snapshot");
                return Some(verdict);
            }
        }
    }

    loop {
        tokio::select! {
            _ = cancel.notified() => {
                debug!(key = %key, "wait cancelled");
                return None;
            }
            received = rx.recv() => match received {
                Ok(update) => match predicate(&update) {
                    Verdict::Pending => {}
                    verdict => {
                        debug!(key = %key, ?verdict, "wait resolved");
                        return Some(verdict);
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    // Re-check the snapshot: the decisive update may be one
                    // of the records we skipped past.
                    warn!(key = %key, skipped, "wait lagged behind updates, replaying snapshot");
                    for existing in aggregator.snapshot(kind) {
                        match predicate(&existing) {
                            Verdict::Pending => {}
                            verdict => return Some(verdict),
                        }
                    }
                }
                Err(RecvError::Closed) => return None,
            },
        }
    }
}

/// Handle to one outstanding wait.
///
/// Resolves at most once. Dropping the handle cancels the wait: the watch
/// task and its subscription are torn down, so an abandoned handle never
/// leaks a task.
pub struct WaitHandle {
    key: CorrelationKey,
    resolve: oneshot::Receiver<Verdict>,
    cancel: Arc<Notify>,
}

impl WaitHandle {
    /// Await the single resolution of this wait.
    pub async fn outcome(&mut self) -> Result<Verdict, WaitError> {
        (&mut self.resolve).await.map_err(|_| WaitError::Cancelled)
    }

    /// Tear down the subscription without resolving the wait.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        // Wakes the watch task if it is still live; a stored permit is
        // harmless once the wait has resolved.
        self.cancel.notify_one();
    }
}

impl std::fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitHandle").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StatePayload, TaskState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn task_payload(id: &str) -> StatePayload {
        StatePayload::Task(TaskState::with_booking(id))
    }

    fn booking_matches(id: &'static str) -> impl Fn(&StateUpdate) -> Verdict + Send + Sync {
        move |update| match update.payload.as_task() {
            Some(task) if task.booking.id == id => Verdict::Success,
            _ => Verdict::Pending,
        }
    }

    #[tokio::test]
    async fn test_resolves_on_matching_update() {
        let aggregator = Arc::new(StateAggregator::new());
        let waiter = CorrelationWaiter::new(aggregator.clone());

        let mut handle =
            waiter.wait_until(StateKind::Task, "task:abc".into(), booking_matches("abc"));

        aggregator.update("other", task_payload("other"));
        aggregator.update("abc", task_payload("abc"));

        assert_eq!(handle.outcome().await, Ok(Verdict::Success));
    }

    #[tokio::test]
    async fn test_resolves_from_existing_record() {
        let aggregator = Arc::new(StateAggregator::new());
        let waiter = CorrelationWaiter::new(aggregator.clone());

        // Publish before subscribing: the classic missed-update race.
        aggregator.update("abc", task_payload("abc"));

        let mut handle =
            waiter.wait_until(StateKind::Task, "task:abc".into(), booking_matches("abc"));

        assert_eq!(handle.outcome().await, Ok(Verdict::Success));
    }

    #[tokio::test]
    async fn test_resolves_at_most_once() {
        let aggregator = Arc::new(StateAggregator::new());
        let waiter = CorrelationWaiter::new(aggregator.clone());

        let evaluations = Arc::new(AtomicUsize::new(0));
        let counted = evaluations.clone();
        let mut handle = waiter.wait_until(StateKind::Task, "task:abc".into(), move |update| {
            counted.fetch_add(1, Ordering::SeqCst);
            match update.payload.as_task() {
                Some(task) if task.booking.id == "abc" => Verdict::Success,
                _ => Verdict::Pending,
            }
        });

        aggregator.update("abc", task_payload("abc"));
        assert_eq!(handle.outcome().await, Ok(Verdict::Success));
        let after_first = evaluations.load(Ordering::SeqCst);

        // Further matching updates no longer reach the predicate.
        aggregator.update("abc", task_payload("abc"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(evaluations.load(Ordering::SeqCst), after_first);
        assert_eq!(waiter.live_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_verdict_resolves() {
        let aggregator = Arc::new(StateAggregator::new());
        let waiter = CorrelationWaiter::new(aggregator.clone());

        let mut handle = waiter.wait_until(StateKind::Task, "task:bad".into(), |update| {
            match update.payload.as_task() {
                Some(task) if task.booking.id == "bad" => Verdict::Failure,
                _ => Verdict::Pending,
            }
        });

        aggregator.update("bad", task_payload("bad"));
        assert_eq!(handle.outcome().await, Ok(Verdict::Failure));
    }

    #[tokio::test]
    async fn test_cancel_reports_cancelled() {
        let aggregator = Arc::new(StateAggregator::new());
        let waiter = CorrelationWaiter::new(aggregator.clone());

        let mut handle =
            waiter.wait_until(StateKind::Task, "task:abc".into(), booking_matches("abc"));

        handle.cancel();
        assert_eq!(handle.outcome().await, Err(WaitError::Cancelled));

        // A matching update after cancellation resolves nothing.
        aggregator.update("abc", task_payload("abc"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(waiter.live_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_handle_tears_down_wait() {
        let aggregator = Arc::new(StateAggregator::new());
        let waiter = CorrelationWaiter::new(aggregator.clone());

        let handle = waiter.wait_until(StateKind::Task, "task:abc".into(), booking_matches("abc"));
        assert_eq!(waiter.live_count(), 1);

        drop(handle);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(waiter.live_count(), 0, "abandoned wait unsubscribed");
    }

    #[tokio::test]
    async fn test_shutdown_drains_all_waits() {
        let aggregator = Arc::new(StateAggregator::new());
        let waiter = CorrelationWaiter::new(aggregator.clone());

        let mut first =
            waiter.wait_until(StateKind::Task, "task:a".into(), booking_matches("a"));
        let mut second =
            waiter.wait_until(StateKind::Alert, "alert:b".into(), |_| Verdict::Pending);
        assert_eq!(waiter.live_count(), 2);

        waiter.shutdown();

        assert_eq!(first.outcome().await, Err(WaitError::Cancelled));
        assert_eq!(second.outcome().await, Err(WaitError::Cancelled));
        assert_eq!(waiter.live_count(), 0);
    }

    #[tokio::test]
    async fn test_pending_verdicts_keep_waiting() {
        let aggregator = Arc::new(StateAggregator::new());
        let waiter = CorrelationWaiter::new(aggregator.clone());

        let mut handle =
            waiter.wait_until(StateKind::Task, "task:abc".into(), booking_matches("abc"));

        for i in 0..10 {
            aggregator.update(format!("task-{i}"), task_payload(&format!("task-{i}")));
        }
        aggregator.update("abc", task_payload("abc"));

        assert_eq!(handle.outcome().await, Ok(Verdict::Success));
    }
}
