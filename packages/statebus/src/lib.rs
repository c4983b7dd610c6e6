//! # Statebus
//!
//! Latest-known fleet state with broadcast fan-out, correlation waits,
//! and content-hash dedup of re-delivered messages.
//!
//! ## Core Concepts
//!
//! Statebus separates **records** from **notifications**:
//! - The record store answers "what is the latest state of X right now?"
//! - The broadcast streams answer "tell me when any state of this kind changes"
//!
//! Every incoming state lands in both, under a per-kind lock, so a consumer
//! who reads the record store and then subscribes (or the other way round)
//! can never construct a view older than what a past subscriber has seen.
//!
//! ## Architecture
//!
//! ```text
//! Transports (fleet adapters, sensors, alert repo)
//!     │
//!     ▼ update()
//! StateAggregator ── records: latest payload per (kind, key)
//!     │
//!     ├─► broadcast::Sender per StateKind
//!     │         │
//!     │         ▼ subscribe()
//!     │   CorrelationWaiter ── snapshot replay + live predicate evaluation
//!     │         │
//!     │         ▼ outcome()
//!     │   step engine (fleetline)
//!     │
//!     └─► snapshot() for point-in-time reads
//! ```
//!
//! ## Guarantees
//!
//! - **Last-writer-wins**: the record store keeps only the newest payload
//!   per key; there is no history.
//! - **At-most-once delivery**: slow subscribers may lag and skip updates;
//!   the record store is the recovery path.
//! - **No missed resolutions**: a wait replays the snapshot after
//!   subscribing, so a record that arrived before the wait still resolves it.
//! - **In-memory only**: nothing is persisted.

mod aggregator;
mod dedup;
mod model;
mod waiter;

pub use aggregator::{StateAggregator, StateUpdate, DEFAULT_CAPACITY};
pub use dedup::{content_hash, Deduplicator, DEFAULT_WINDOW};
pub use model::{
    AlertRecord, Bbox, Booking, CorrelationKey, DetectionEvent, DispenserState, DoorMode,
    DoorState, EventStatus, FleetState, IngestorState, LiftState, Location, Phase, PhaseEvent,
    RobotState, StateKind, StatePayload, TaskState, UserAction, WorkcellMode,
};
pub use waiter::{CorrelationWaiter, Verdict, WaitError, WaitHandle};
