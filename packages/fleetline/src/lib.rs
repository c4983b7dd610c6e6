//! # Fleetline
//!
//! A step-graph sequencer for multi-robot service flows: chain fleet
//! dispatches, operator notifications, device commands, and API calls
//! into supervised runs, driven by sensor detections and zone occupancy.
//!
//! ## Core Concepts
//!
//! Fleetline separates **deciding what happened** from **driving what
//! happens next**:
//! - The `statebus` crate holds the latest known fleet state and resolves
//!   correlation waits over it.
//! - This crate walks step graphs, suspending on those waits, on delays,
//!   and on fan-out joins.
//!
//! ## Architecture
//!
//! ```text
//! Detections ──► SensorIngest ──► TriggerManager
//!   (dedup)          │                  │ spawn
//!                    ▼                  ▼
//!              ZoneOccupancy      ServiceRun ── StepGroup ── Step
//!                    ▲                  │
//!                    │ poll             ├─► RoboticDispatch ─► DispatchApi
//!              OccupancyPatrol ◄────────┤        │ wait on booking id
//!                                       ├─► Notification ──► AlertRepository
//!                                       │        │ wait on operator action
//!                                       ├─► DeviceCommand ─► DeviceBus
//!                                       └─► ApiCall / CustomAction
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Steps are single-shot** - a completed or failed step rejects restart
//! 2. **Fan-out is a join** - a failing sibling never cancels the others
//! 3. **Stop is not failure** - a stopped run is neither succeeded nor failed
//! 4. **Pause is cooperative** - runs hold only at suspension points
//! 5. **Collaborators are traits** - every IO surface has an in-memory fake

mod collaborators;
mod config;
mod context;
mod error;
mod ingest;
mod request;
mod service;
mod step;
mod trigger;

// Step bodies and prebuilt flows
mod flows;
mod steps;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export collaborator seams
pub use collaborators::{
    AlertRepository, Collaborators, DeviceBus, DispatchApi, HttpDispatchApi, NewAlert,
    OccupancyFeed,
};

// Re-export configuration
pub use config::Config;

// Re-export run context
pub use context::RunContext;

// Re-export error types
pub use error::{RunError, StepError};

// Re-export ingest types
pub use ingest::{SensorIngest, ZoneOccupancy, OCCUPANCY_ZONE_PREFIX};

// Re-export request composition
pub use request::{Activity, DispatchResponse, TaskRequest};

// Re-export run types
pub use service::{RunHandle, RunOutcome, RunStatus, ServiceRun, StepGroup};

// Re-export step types
pub use step::{
    await_verdict, cancellable_sleep, ControlSignal, Step, StepBody, StepControl, StepOutcome,
};
pub use steps::{
    ApiCall, CustomAction, DeviceCommand, HttpMethod, Notification, OccupancyPatrol,
    RoboticDispatch,
};

// Re-export triggers and flows
pub use flows::{bed_exit_flow, delivery_flow};
pub use trigger::TriggerManager;

// Re-export commonly used external types
pub use async_trait::async_trait;
