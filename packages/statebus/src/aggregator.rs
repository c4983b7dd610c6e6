//! Latest-known state records with per-kind broadcast fan-out.
//!
//! # Guarantees
//!
//! - **Last-write-wins**: one live record per `(kind, key)`, overwritten on
//!   every update, ordered by arrival (not by payload timestamps).
//! - **Ordered multicast**: every subscriber of a kind sees every update
//!   published after it subscribed, in ingestion order.
//! - **Non-blocking fan-out**: delivery rides a `tokio::sync::broadcast`
//!   channel; a slow subscriber lags on its own receiver and never stalls
//!   ingestion or reorders delivery for others.
//! - **No eviction**: records are never removed automatically. Absence is
//!   signalled by an explicit upstream reset update if a deployment needs it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use crate::model::{StateKind, StatePayload};

/// Default broadcast capacity per kind. Slow receivers start lagging once
/// this many updates are buffered behind them.
pub const DEFAULT_CAPACITY: usize = 1024;

/// One update as seen by subscribers: the record key plus the new payload.
///
/// Payloads travel as `Arc` so fan-out to N subscribers never deep-clones.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub key: Arc<str>,
    pub payload: Arc<StatePayload>,
}

/// Multiplexes independent state-update streams into a queryable
/// latest-known snapshot.
///
/// Explicitly constructed and passed by handle (`Arc<StateAggregator>`);
/// there is no ambient global instance.
///
/// # Example
///
/// ```ignore
/// let aggregator = Arc::new(StateAggregator::new());
/// let mut tasks = aggregator.subscribe(StateKind::Task);
///
/// aggregator.update("task-1", StatePayload::Task(TaskState::with_booking("task-1")));
///
/// let update = tasks.recv().await?;
/// assert_eq!(&*update.key, "task-1");
/// ```
pub struct StateAggregator {
    records: DashMap<(StateKind, Arc<str>), Arc<StatePayload>>,
    channels: HashMap<StateKind, broadcast::Sender<StateUpdate>>,
    /// Serializes record-write + publish per kind so arrival order forms a
    /// single total order even under multi-threaded ingestion.
    ingest_locks: HashMap<StateKind, Mutex<()>>,
}

impl StateAggregator {
    /// Create an aggregator with default per-kind channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an aggregator with the given per-kind channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut channels = HashMap::new();
        let mut ingest_locks = HashMap::new();
        for kind in StateKind::ALL {
            let (sender, _) = broadcast::channel(capacity);
            channels.insert(kind, sender);
            ingest_locks.insert(kind, Mutex::new(()));
        }
        Self {
            records: DashMap::new(),
            channels,
            ingest_locks,
        }
    }

    /// Overwrite the record for `(payload.kind(), key)` and publish the
    /// update to all live subscribers of that kind.
    ///
    /// Returns the number of subscribers the update was delivered to.
    pub fn update(&self, key: impl Into<String>, payload: StatePayload) -> usize {
        let kind = payload.kind();
        let key: Arc<str> = Arc::from(key.into());
        let payload = Arc::new(payload);

        // Both maps are pre-populated for every kind in the constructor.
        let guard = self.ingest_locks[&kind].lock().unwrap_or_else(|e| e.into_inner());
        self.records.insert((kind, key.clone()), payload.clone());
        let delivered = self.channels[&kind]
            .send(StateUpdate { key: key.clone(), payload })
            .unwrap_or(0);
        drop(guard);

        trace!(kind = %kind, key = %key, delivered, "state record updated");
        delivered
    }

    /// Current payload for `(kind, key)`, if any update has arrived.
    pub fn get(&self, kind: StateKind, key: &str) -> Option<Arc<StatePayload>> {
        self.records
            .get(&(kind, Arc::from(key)))
            .map(|entry| entry.value().clone())
    }

    /// Subscribe to live updates of a kind.
    ///
    /// The receiver sees every update published after this call, in arrival
    /// order. No history is replayed; pair with [`Self::snapshot`] to cover
    /// records that arrived earlier.
    pub fn subscribe(&self, kind: StateKind) -> broadcast::Receiver<StateUpdate> {
        self.channels[&kind].subscribe()
    }

    /// All current records of a kind, as synthetic updates.
    ///
    /// Subscribe-then-snapshot closes the missed-update race: a record that
    /// arrived before the subscription shows up in the snapshot, and one
    /// that arrives during it shows up on the live receiver (possibly both,
    /// which is harmless for idempotent predicates).
    pub fn snapshot(&self, kind: StateKind) -> Vec<StateUpdate> {
        self.records
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| StateUpdate {
                key: entry.key().1.clone(),
                payload: entry.value().clone(),
            })
            .collect()
    }

    /// Number of live subscribers for a kind.
    pub fn subscriber_count(&self, kind: StateKind) -> usize {
        self.channels[&kind].receiver_count()
    }
}

impl Default for StateAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateAggregator")
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}
