//! Typed state payloads for the aggregation layer.
//!
//! Every record the aggregator holds is one of these tagged variants.
//! Upstream adapters deserialize their wire messages into these models
//! before handing them to [`crate::StateAggregator::update`]; nothing
//! downstream ever sees an untyped dictionary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The stream a state record belongs to.
///
/// Each kind has its own broadcast channel in the aggregator and its own
/// key namespace (door name, lift name, fleet name, booking id, alert id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Door,
    Lift,
    Dispenser,
    Ingestor,
    Fleet,
    Task,
    Alert,
}

impl StateKind {
    /// All kinds, in a fixed order. Used to pre-build one channel per kind.
    pub const ALL: [StateKind; 7] = [
        StateKind::Door,
        StateKind::Lift,
        StateKind::Dispenser,
        StateKind::Ingestor,
        StateKind::Fleet,
        StateKind::Task,
        StateKind::Alert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Door => "door_state",
            StateKind::Lift => "lift_state",
            StateKind::Dispenser => "dispenser_state",
            StateKind::Ingestor => "ingestor_state",
            StateKind::Fleet => "fleet_state",
            StateKind::Task => "task_state",
            StateKind::Alert => "alert_state",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier linking an asynchronous request to its eventual outcome event.
///
/// Opaque to the engine: uniqueness is the caller's responsibility. The
/// convention is `"{stream}:{id}"`, e.g. `task:abc-123` or `alert:notify-7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Task state
// =============================================================================

/// Status of a task or of a named event within a task phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Queued,
    Standby,
    Underway,
    Completed,
    Failed,
    Canceled,
}

impl EventStatus {
    /// True for statuses from which no further transition occurs.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventStatus::Completed | EventStatus::Failed | EventStatus::Canceled
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventStatus::Queued => "queued",
            EventStatus::Standby => "standby",
            EventStatus::Underway => "underway",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
            EventStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Booking metadata for a dispatched task. The booking id is the key the
/// aggregator stores task state under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
}

/// A named sub-event within a task phase. Milestones like
/// `"Go to [place:dock-3]"` are matched against `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub name: String,
    pub status: EventStatus,
}

/// One phase of a dispatched task, holding its events keyed by event id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Phase {
    #[serde(default)]
    pub events: BTreeMap<String, PhaseEvent>,
}

/// Latest-known state of a dispatched task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub booking: Booking,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,
    #[serde(default)]
    pub phases: BTreeMap<String, Phase>,
}

impl TaskState {
    /// A minimal task state carrying only its booking id.
    pub fn with_booking(id: impl Into<String>) -> Self {
        Self {
            booking: Booking { id: id.into() },
            status: None,
            phases: BTreeMap::new(),
        }
    }

    /// Look up the status of the milestone event named
    /// `"{action} [place:{place}]"`, or the bare `action` when `place` is
    /// empty. Returns `None` if no phase carries such an event yet.
    pub fn milestone_status(&self, action: &str, place: &str) -> Option<EventStatus> {
        let wanted = if place.is_empty() {
            action.to_string()
        } else {
            format!("{action} [place:{place}]")
        };
        for phase in self.phases.values() {
            for event in phase.events.values() {
                if event.name == wanted {
                    return Some(event.status);
                }
            }
        }
        None
    }
}

// =============================================================================
// Alert state
// =============================================================================

/// Action a user took on an alert notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    Acknowledge,
    Accept,
    Reject,
    Cancel,
    Snooze,
    Ignore,
}

impl UserAction {
    /// Terminal-positive actions resolve an acknowledgement wait as success.
    pub fn is_positive_terminal(&self) -> bool {
        matches!(self, UserAction::Acknowledge | UserAction::Accept)
    }

    /// Terminal-negative actions resolve an acknowledgement wait as failure.
    pub fn is_negative_terminal(&self) -> bool {
        matches!(self, UserAction::Reject | UserAction::Cancel)
    }
}

/// An alert as recorded by the alert repository and published on the alert
/// stream. Acknowledgement updates arrive as fresh records whose
/// `original_id` points back at the alert being acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub original_id: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_action: Option<UserAction>,
}

// =============================================================================
// Fleet / infrastructure state
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// Latest-known state of a fleet and all its robots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetState {
    pub name: String,
    #[serde(default)]
    pub robots: BTreeMap<String, RobotState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorMode {
    Closed,
    Moving,
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorState {
    pub name: String,
    pub mode: DoorMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiftState {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_floor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_floor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkcellMode {
    Idle,
    Busy,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenserState {
    pub guid: String,
    pub mode: WorkcellMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestorState {
    pub guid: String,
    pub mode: WorkcellMode,
}

// =============================================================================
// Payload union
// =============================================================================

/// Tagged union over all state record kinds.
///
/// The variant determines which stream an update is published on; the key
/// is supplied by the caller (door name, booking id, alert id, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatePayload {
    Door(DoorState),
    Lift(LiftState),
    Dispenser(DispenserState),
    Ingestor(IngestorState),
    Fleet(FleetState),
    Task(TaskState),
    Alert(AlertRecord),
}

impl StatePayload {
    pub fn kind(&self) -> StateKind {
        match self {
            StatePayload::Door(_) => StateKind::Door,
            StatePayload::Lift(_) => StateKind::Lift,
            StatePayload::Dispenser(_) => StateKind::Dispenser,
            StatePayload::Ingestor(_) => StateKind::Ingestor,
            StatePayload::Fleet(_) => StateKind::Fleet,
            StatePayload::Task(_) => StateKind::Task,
            StatePayload::Alert(_) => StateKind::Alert,
        }
    }

    pub fn as_task(&self) -> Option<&TaskState> {
        match self {
            StatePayload::Task(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_alert(&self) -> Option<&AlertRecord> {
        match self {
            StatePayload::Alert(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_fleet(&self) -> Option<&FleetState> {
        match self {
            StatePayload::Fleet(f) => Some(f),
            _ => None,
        }
    }
}

// =============================================================================
// Detection events
// =============================================================================

/// Axis-aligned bounding box reported by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

/// A detection/sensor feedback event.
///
/// These never enter the aggregator's record map; they flow through the
/// [`crate::Deduplicator`] and into the occupancy/trigger feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub classification: String,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Bbox>,
    pub unix_millis: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_event(name: &str, status: EventStatus) -> TaskState {
        let mut task = TaskState::with_booking("task-1");
        let mut phase = Phase::default();
        phase.events.insert(
            "0".to_string(),
            PhaseEvent {
                name: name.to_string(),
                status,
            },
        );
        task.phases.insert("0".to_string(), phase);
        task
    }

    #[test]
    fn test_milestone_status_with_place() {
        let task = task_with_event("Go to [place:dock-3]", EventStatus::Completed);

        assert_eq!(
            task.milestone_status("Go to", "dock-3"),
            Some(EventStatus::Completed)
        );
        assert_eq!(task.milestone_status("Go to", "dock-4"), None);
    }

    #[test]
    fn test_milestone_status_without_place() {
        let task = task_with_event("Perform teleop", EventStatus::Underway);

        assert_eq!(
            task.milestone_status("Perform teleop", ""),
            Some(EventStatus::Underway)
        );
    }

    #[test]
    fn test_milestone_status_empty_task() {
        let task = TaskState::with_booking("task-2");
        assert_eq!(task.milestone_status("Go to", "dock-3"), None);
    }

    #[test]
    fn test_event_status_terminal() {
        assert!(EventStatus::Completed.is_terminal());
        assert!(EventStatus::Failed.is_terminal());
        assert!(EventStatus::Canceled.is_terminal());
        assert!(!EventStatus::Underway.is_terminal());
        assert!(!EventStatus::Queued.is_terminal());
    }

    #[test]
    fn test_user_action_terminality() {
        assert!(UserAction::Acknowledge.is_positive_terminal());
        assert!(UserAction::Accept.is_positive_terminal());
        assert!(UserAction::Reject.is_negative_terminal());
        assert!(UserAction::Cancel.is_negative_terminal());
        assert!(!UserAction::Snooze.is_positive_terminal());
        assert!(!UserAction::Snooze.is_negative_terminal());
        assert!(!UserAction::Ignore.is_negative_terminal());
    }

    #[test]
    fn test_payload_kind_tags() {
        let task = StatePayload::Task(TaskState::with_booking("t"));
        assert_eq!(task.kind(), StateKind::Task);
        assert!(task.as_task().is_some());
        assert!(task.as_alert().is_none());

        let door = StatePayload::Door(DoorState {
            name: "main".into(),
            mode: DoorMode::Open,
        });
        assert_eq!(door.kind(), StateKind::Door);
    }

    #[test]
    fn test_correlation_key_display() {
        let key = CorrelationKey::from("task:abc");
        assert_eq!(key.as_str(), "task:abc");
        assert_eq!(key.to_string(), "task:abc");
    }

    #[test]
    fn test_detection_event_round_trip() {
        let event = DetectionEvent {
            classification: "bed_exit".into(),
            zones: vec!["bed_2".into()],
            direction: Some("left".into()),
            bbox: None,
            unix_millis: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: DetectionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_state_kind_display() {
        assert_eq!(StateKind::Task.to_string(), "task_state");
        assert_eq!(StateKind::ALL.len(), 7);
    }
}
