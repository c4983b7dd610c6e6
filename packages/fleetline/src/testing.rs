//! In-memory collaborator fakes for exercising flows without a fleet.
//!
//! Enable with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! fleetline = { version = "...", features = ["testing"] }
//! ```

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use statebus::{
    AlertRecord, EventStatus, Phase, PhaseEvent, StateAggregator, StatePayload, TaskState,
    UserAction,
};

use crate::collaborators::{
    AlertRepository, Collaborators, DeviceBus, DispatchApi, NewAlert, OccupancyFeed,
};
use crate::config::Config;
use crate::context::RunContext;
use crate::request::{DispatchResponse, TaskRequest};

/// A task state whose `"{action} [place:...]"` milestone carries `status`.
pub fn nav_task(booking_id: &str, place: &str, status: EventStatus) -> StatePayload {
    let mut task = TaskState::with_booking(booking_id);
    let mut phase = Phase::default();
    phase.events.insert(
        "0".to_string(),
        PhaseEvent {
            name: format!("Go to [place:{place}]"),
            status,
        },
    );
    task.phases.insert("0".to_string(), phase);
    StatePayload::Task(task)
}

pub fn completed_nav_task(booking_id: &str, place: &str) -> StatePayload {
    nav_task(booking_id, place, EventStatus::Completed)
}

enum DispatchMode {
    /// Accept every request; fixed booking id if set, generated otherwise.
    Succeed(Option<String>),
    /// Accept and immediately publish the completed navigation milestone.
    AutoComplete,
    Fail(String),
}

/// Dispatch fake that records submissions and answers per a scripted mode.
pub struct FakeDispatchApi {
    aggregator: Arc<StateAggregator>,
    submissions: Mutex<Vec<TaskRequest>>,
    mode: Mutex<DispatchMode>,
    counter: AtomicUsize,
}

impl FakeDispatchApi {
    pub fn new(aggregator: Arc<StateAggregator>) -> Self {
        Self {
            aggregator,
            submissions: Mutex::new(Vec::new()),
            mode: Mutex::new(DispatchMode::Succeed(None)),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn succeed_with(&self, booking_id: &str) {
        *self.mode.lock().unwrap() = DispatchMode::Succeed(Some(booking_id.to_string()));
    }

    /// Every accepted task's navigation milestone completes instantly.
    pub fn auto_complete(&self) {
        *self.mode.lock().unwrap() = DispatchMode::AutoComplete;
    }

    pub fn fail_with(&self, reason: &str) {
        *self.mode.lock().unwrap() = DispatchMode::Fail(reason.to_string());
    }

    pub fn submissions(&self) -> Vec<TaskRequest> {
        self.submissions.lock().unwrap().clone()
    }

    fn next_id(&self) -> String {
        format!("task-{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl DispatchApi for FakeDispatchApi {
    async fn submit(&self, request: &TaskRequest) -> Result<DispatchResponse> {
        self.submissions.lock().unwrap().push(request.clone());
        let mode = self.mode.lock().unwrap();
        match &*mode {
            DispatchMode::Fail(reason) => Ok(DispatchResponse {
                success: false,
                state: None,
                error: Some(reason.clone()),
            }),
            DispatchMode::Succeed(fixed) => {
                let id = fixed.clone().unwrap_or_else(|| self.next_id());
                Ok(DispatchResponse {
                    success: true,
                    state: Some(TaskState::with_booking(id)),
                    error: None,
                })
            }
            DispatchMode::AutoComplete => {
                let id = self.next_id();
                self.aggregator
                    .update(id.clone(), completed_nav_task(&id, request.activity.place()));
                Ok(DispatchResponse {
                    success: true,
                    state: Some(TaskState::with_booking(id)),
                    error: None,
                })
            }
        }
    }
}

/// Alert repository fake keeping created records in memory.
pub struct FakeAlertRepository {
    created: Mutex<Vec<AlertRecord>>,
}

impl FakeAlertRepository {
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> Vec<AlertRecord> {
        self.created.lock().unwrap().clone()
    }

    pub fn last_original_id(&self) -> String {
        self.created
            .lock()
            .unwrap()
            .last()
            .map(|a| a.original_id.clone())
            .unwrap_or_default()
    }
}

impl Default for FakeAlertRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertRepository for FakeAlertRepository {
    async fn create_alert(&self, alert: NewAlert) -> Result<AlertRecord> {
        let record = AlertRecord {
            id: alert.original_id.clone(),
            original_id: alert.original_id,
            category: alert.category,
            alert_type: Some(alert.alert_type),
            robot_id: alert.robot_id,
            service_id: alert.service_id,
            location: alert.location,
            patient_id: alert.patient_id,
            user_group: alert.user_group,
            message_action: alert.message_action,
            other: alert.other,
            acknowledged_by: None,
            user_action: None,
        };
        self.created.lock().unwrap().push(record.clone());
        Ok(record)
    }
}

/// Device bus fake recording every published command.
pub struct FakeDeviceBus {
    published: Mutex<Vec<(String, Value)>>,
}

impl FakeDeviceBus {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }
}

impl Default for FakeDeviceBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceBus for FakeDeviceBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// Occupancy feed whose readings can be set directly or scripted per poll.
pub struct FakeOccupancy {
    script: Mutex<VecDeque<BTreeSet<String>>>,
    current: Mutex<BTreeSet<String>>,
}

impl FakeOccupancy {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            current: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn set(&self, zones: &[&str]) {
        *self.current.lock().unwrap() = zones.iter().map(|z| z.to_string()).collect();
    }

    /// Queue one reading per upcoming poll; after the script runs out the
    /// last reading sticks.
    pub fn script(&self, readings: Vec<Vec<&str>>) {
        let mut script = self.script.lock().unwrap();
        for reading in readings {
            script.push_back(reading.iter().map(|z| z.to_string()).collect());
        }
    }
}

impl Default for FakeOccupancy {
    fn default() -> Self {
        Self::new()
    }
}

impl OccupancyFeed for FakeOccupancy {
    fn occupied_zones(&self) -> BTreeSet<String> {
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *self.current.lock().unwrap() = next.clone();
            return next;
        }
        self.current.lock().unwrap().clone()
    }
}

/// A [`RunContext`] wired to fakes, with handles to each of them.
pub struct TestHarness {
    pub ctx: RunContext,
    pub dispatch: Arc<FakeDispatchApi>,
    pub alerts: Arc<FakeAlertRepository>,
    pub devices: Arc<FakeDeviceBus>,
    pub occupancy: Arc<FakeOccupancy>,
}

impl TestHarness {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let aggregator = Arc::new(StateAggregator::new());
        let dispatch = Arc::new(FakeDispatchApi::new(aggregator.clone()));
        let alerts = Arc::new(FakeAlertRepository::new());
        let devices = Arc::new(FakeDeviceBus::new());
        let occupancy = Arc::new(FakeOccupancy::new());

        let collaborators = Collaborators {
            dispatch: dispatch.clone(),
            alerts: alerts.clone(),
            devices: devices.clone(),
            occupancy: occupancy.clone(),
        };
        let ctx = RunContext::new(aggregator, collaborators, config);

        Self {
            ctx,
            dispatch,
            alerts,
            devices,
            occupancy,
        }
    }

    /// Block until some step has a correlation wait registered.
    pub async fn wait_for_live_wait(&self) {
        for _ in 0..500 {
            if self.ctx.waiter.live_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("no correlation wait appeared");
    }

    /// Publish an operator response referencing `original_id`.
    pub fn respond_to_alert(&self, original_id: &str, action: UserAction) {
        let record = AlertRecord {
            id: Uuid::new_v4().to_string(),
            original_id: original_id.to_string(),
            category: "default".to_string(),
            alert_type: None,
            robot_id: None,
            service_id: None,
            location: None,
            patient_id: None,
            user_group: None,
            message_action: None,
            other: None,
            acknowledged_by: Some("test-user".to_string()),
            user_action: Some(action),
        };
        self.ctx
            .aggregator
            .update(record.id.clone(), StatePayload::Alert(record));
    }
}

/// Shorthand for tests that only need the context itself.
pub fn test_context() -> RunContext {
    TestHarness::new().ctx
}
