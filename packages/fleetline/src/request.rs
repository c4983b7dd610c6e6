//! Composition of fleet task requests.
//!
//! The dispatch endpoint accepts a `compose` task whose single phase is a
//! sequence of activities. Only the activity kinds the flows actually use
//! are modelled; everything else about the envelope (request type, earliest
//! start time, phase wrapper) is fixed here so callers only pick an
//! activity and a robot.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use statebus::TaskState;

/// One activity inside the composed sequence phase.
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    /// Navigate to a named waypoint, optionally facing a heading in degrees.
    GoToPlace {
        waypoint: String,
        facing_deg: Option<f64>,
    },
    /// Hand control to an operator; duration estimate is a fixed minute.
    Teleop,
    /// Enter a zone and park at any of the admitted parking types.
    Zone {
        zone: String,
        types: Vec<String>,
        facing_deg: Option<f64>,
    },
}

impl Activity {
    pub fn go_to_place(waypoint: impl Into<String>) -> Self {
        Activity::GoToPlace {
            waypoint: waypoint.into(),
            facing_deg: None,
        }
    }

    pub fn zone(zone: impl Into<String>) -> Self {
        Activity::Zone {
            zone: zone.into(),
            types: vec!["all".to_string()],
            facing_deg: None,
        }
    }

    /// The place name used when matching milestone events for this activity.
    pub fn place(&self) -> &str {
        match self {
            Activity::GoToPlace { waypoint, .. } => waypoint,
            Activity::Zone { zone, .. } => zone,
            Activity::Teleop => "",
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Activity::GoToPlace {
                waypoint,
                facing_deg,
            } => {
                let mut desc = json!({ "waypoint": waypoint });
                if let Some(deg) = facing_deg {
                    desc["orientation"] = json!(deg.to_radians());
                }
                json!({ "category": "go_to_place", "description": desc })
            }
            Activity::Teleop => json!({
                "category": "perform_action",
                "description": {
                    "unix_millis_action_duration_estimate": 60_000,
                    "category": "teleop",
                    "description": {},
                },
            }),
            Activity::Zone {
                zone,
                types,
                facing_deg,
            } => json!({
                "category": "zone",
                "description": {
                    "zone": zone,
                    "types": types,
                    "facing": facing_deg.map(f64::to_radians),
                },
            }),
        }
    }
}

/// A fleet task request ready for submission.
///
/// With both `robot` and `fleet` set the request pins the task to that
/// robot; otherwise the dispatcher picks one.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub robot: Option<String>,
    pub fleet: Option<String>,
    pub activity: Activity,
    /// Seconds from now until the task may start.
    pub start_offset_secs: i64,
}

impl TaskRequest {
    pub fn direct(robot: impl Into<String>, fleet: impl Into<String>, activity: Activity) -> Self {
        Self {
            robot: Some(robot.into()),
            fleet: Some(fleet.into()),
            activity,
            start_offset_secs: 0,
        }
    }

    pub fn dispatched(activity: Activity) -> Self {
        Self {
            robot: None,
            fleet: None,
            activity,
            start_offset_secs: 0,
        }
    }

    /// Render the full submission payload.
    pub fn payload(&self) -> Value {
        let mut payload = match (&self.fleet, &self.robot) {
            (Some(fleet), Some(robot)) => json!({
                "type": "robot_task_request",
                "robot": robot,
                "fleet": fleet,
            }),
            _ => json!({ "type": "dispatch_task_request" }),
        };

        let start_time = Utc::now().timestamp_millis() + self.start_offset_secs * 1000;
        payload["request"] = json!({
            "unix_millis_earliest_start_time": start_time,
            "category": "compose",
            "description": {
                "category": self.activity_category(),
                "phases": [{
                    "activity": {
                        "category": "sequence",
                        "description": { "activities": [self.activity.to_value()] },
                    },
                }],
            },
        });
        payload
    }

    fn activity_category(&self) -> &'static str {
        match self.activity {
            Activity::GoToPlace { .. } => "go_to_place",
            Activity::Teleop => "teleop",
            Activity::Zone { .. } => "zone",
        }
    }
}

/// Outcome of a task submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub success: bool,
    /// Initial task state; carries the booking id used for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResponse {
    pub fn booking_id(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.booking.id.as_str())
    }
}
