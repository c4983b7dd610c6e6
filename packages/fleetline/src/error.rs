//! Error types for step execution and service runs.

use thiserror::Error;

/// Why a step did not complete.
///
/// Cancellation is deliberately a variant here rather than a separate
/// channel: a step that observes a stop signal returns
/// [`StepError::Cancelled`] and the engine translates that into a stopped
/// run instead of a failed one.
#[derive(Debug, Error)]
pub enum StepError {
    /// The dispatch endpoint rejected the task request outright.
    #[error("dispatch for robot {robot_id} rejected: {reason}")]
    DispatchFailed { robot_id: String, reason: String },

    /// The dispatched task reached a terminal state other than completion.
    #[error("task {task_id} ended without completing")]
    TaskOutcome { task_id: String },

    /// An operator answered the alert negatively (reject or cancel).
    #[error("alert {alert_id} was declined")]
    AlertDeclined { alert_id: String },

    /// Transport-level failure talking to an external endpoint.
    #[error("external call failed: {0}")]
    ExternalCall(#[from] reqwest::Error),

    /// The step was interrupted by a stop signal or waiter shutdown.
    #[error("step cancelled")]
    Cancelled,

    /// A collaborator (alert repository, device bus) reported a failure.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl StepError {
    /// Cancellation is not a failure: the engine maps it to a stopped run.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }
}

/// Why a service run could not start or finish.
#[derive(Debug, Error)]
pub enum RunError {
    /// `run` was called while a previous invocation is still executing.
    #[error("service {name} is already running")]
    AlreadyRunning { name: String },

    /// A step was started a second time after reaching a terminal state.
    #[error("step {name} already reached a terminal state")]
    StepAlreadyTerminal { name: String },

    /// The supervised run task panicked or was aborted.
    #[error("service run task ended abnormally")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_failure() {
        assert!(StepError::Cancelled.is_cancellation());
        assert!(!StepError::TaskOutcome {
            task_id: "t".into()
        }
        .is_cancellation());
    }

    #[test]
    fn test_error_messages_name_the_subject() {
        let err = StepError::DispatchFailed {
            robot_id: "r7".into(),
            reason: "no fleet".into(),
        };
        assert_eq!(err.to_string(), "dispatch for robot r7 rejected: no fleet");

        let err = RunError::AlreadyRunning {
            name: "milk_run".into(),
        };
        assert_eq!(err.to_string(), "service milk_run is already running");
    }
}
