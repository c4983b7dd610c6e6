//! Fleet dispatch with milestone-correlated completion.

use std::time::Duration;

use tracing::info;

use statebus::{EventStatus, StateKind, Verdict};

use crate::context::RunContext;
use crate::error::StepError;
use crate::request::{Activity, TaskRequest};
use crate::step::{await_verdict, cancellable_sleep, StepControl};

/// Milestone event prefix the fleet manager emits for navigation legs.
const NAV_ACTION: &str = "Go to";

/// Dispatch one fleet task and wait for its navigation milestone.
///
/// The dispatch response carries the booking id; completion is then read
/// off the task state stream by matching the `"Go to [place:...]"`
/// milestone for that booking. A milestone of failed or canceled fails
/// the step.
pub struct RoboticDispatch {
    pub robot: String,
    pub fleet: String,
    pub activity: Activity,
    /// Extra settle time after the milestone completes.
    pub post_delay: Option<Duration>,
}

impl RoboticDispatch {
    pub fn new(robot: impl Into<String>, fleet: impl Into<String>, activity: Activity) -> Self {
        Self {
            robot: robot.into(),
            fleet: fleet.into(),
            activity,
            post_delay: None,
        }
    }

    pub fn with_post_delay(mut self, delay: Duration) -> Self {
        self.post_delay = Some(delay);
        self
    }

    pub(crate) async fn run(
        &self,
        ctx: &RunContext,
        control: &StepControl,
    ) -> Result<(), StepError> {
        let request = TaskRequest::direct(&self.robot, &self.fleet, self.activity.clone());
        let response = ctx.collaborators.dispatch.submit(&request).await?;

        if !response.success {
            return Err(StepError::DispatchFailed {
                robot_id: self.robot.clone(),
                reason: response
                    .error
                    .unwrap_or_else(|| "dispatch endpoint reported failure".to_string()),
            });
        }
        let task_id = match response.booking_id() {
            Some(id) => id.to_string(),
            None => {
                return Err(StepError::DispatchFailed {
                    robot_id: self.robot.clone(),
                    reason: "dispatch response carried no booking id".to_string(),
                })
            }
        };
        info!(robot = %self.robot, task_id = %task_id, place = self.activity.place(), "task dispatched");

        let place = self.activity.place().to_string();
        let booking = task_id.clone();
        let handle = ctx.waiter.wait_until(
            StateKind::Task,
            format!("task:{task_id}").into(),
            move |update| {
                let Some(task) = update.payload.as_task() else {
                    return Verdict::Pending;
                };
                if task.booking.id != booking {
                    return Verdict::Pending;
                }
                match task.milestone_status(NAV_ACTION, &place) {
                    Some(EventStatus::Completed) => Verdict::Success,
                    Some(EventStatus::Failed) | Some(EventStatus::Canceled) => Verdict::Failure,
                    _ => Verdict::Pending,
                }
            },
        );

        match await_verdict(handle, control).await? {
            Verdict::Success => {}
            _ => return Err(StepError::TaskOutcome { task_id }),
        }

        if let Some(delay) = self.post_delay {
            info!(robot = %self.robot, ?delay, "settling after task");
            cancellable_sleep(delay, control).await?;
        }
        Ok(())
    }
}
