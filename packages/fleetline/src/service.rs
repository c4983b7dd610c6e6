//! Service runs: ordered groups of steps executed under one control channel.
//!
//! A run walks its groups in order. A parallel group is a join, not a
//! race: every sibling runs to its own outcome and a failing sibling does
//! not cancel the others. A failing step's failure edge runs after its
//! whole group settles, then the walk stops and the run is failed; a stop
//! signal ends the run as stopped rather than failed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::RunContext;
use crate::error::{RunError, StepError};
use crate::step::{ControlSignal, Step, StepControl, StepOutcome};

/// One stage of a run: a lone step or a parallel fan-out.
pub enum StepGroup {
    Single(Step),
    Parallel(Vec<Step>),
}

impl StepGroup {
    fn label(&self) -> String {
        match self {
            StepGroup::Single(step) => step.name().to_string(),
            StepGroup::Parallel(steps) => steps
                .iter()
                .map(Step::name)
                .collect::<Vec<_>>()
                .join("+"),
        }
    }
}

/// Lifecycle of a service run.
///
/// A failed run still reads `Completed`; whether it succeeded is carried
/// by the [`RunOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded,
    Failed(StepError),
    /// Stopped by its handle before finishing.
    Stopped,
}

enum GroupResult {
    Continue,
    Stopped,
    Failed(StepError),
}

/// A named sequence of step groups.
pub struct ServiceRun {
    name: String,
    id: Uuid,
    groups: Vec<StepGroup>,
    running: AtomicBool,
    status_tx: Arc<watch::Sender<RunStatus>>,
    control_tx: Arc<watch::Sender<ControlSignal>>,
    current_step_tx: Arc<watch::Sender<Option<String>>>,
}

impl ServiceRun {
    pub fn new(name: impl Into<String>) -> Self {
        let (status_tx, _) = watch::channel(RunStatus::Idle);
        let (control_tx, _) = watch::channel(ControlSignal::Run);
        let (current_step_tx, _) = watch::channel(None);
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            groups: Vec::new(),
            running: AtomicBool::new(false),
            status_tx: Arc::new(status_tx),
            control_tx: Arc::new(control_tx),
            current_step_tx: Arc::new(current_step_tx),
        }
    }

    pub fn then(mut self, step: Step) -> Self {
        self.groups.push(StepGroup::Single(step));
        self
    }

    /// Fan out: all steps start together and the run waits for every one.
    pub fn then_all(mut self, steps: Vec<Step>) -> Self {
        self.groups.push(StepGroup::Parallel(steps));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> RunStatus {
        *self.status_tx.borrow()
    }

    /// Execute the run to completion on the caller's task.
    ///
    /// Re-entrant invocation is rejected while a previous one is live;
    /// a finished run can only be re-run if none of its steps reached a
    /// terminal state (i.e. it was stopped before doing any work).
    pub async fn run(&self, ctx: &RunContext) -> Result<RunOutcome, RunError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RunError::AlreadyRunning {
                name: self.name.clone(),
            });
        }
        let result = self.run_inner(ctx).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self, ctx: &RunContext) -> Result<RunOutcome, RunError> {
        info!(service = %self.name, id = %self.id, "service run started");
        self.status_tx.send_replace(RunStatus::Running);
        let control = StepControl::new(self.control_tx.subscribe());

        let main = self.run_groups(&self.groups, ctx, &control).await?;
        let outcome = match main {
            GroupResult::Continue => {
                info!(service = %self.name, "service run completed");
                self.status_tx.send_replace(RunStatus::Completed);
                RunOutcome::Succeeded
            }
            GroupResult::Stopped => {
                info!(service = %self.name, "service run stopped");
                self.status_tx.send_replace(RunStatus::Stopped);
                RunOutcome::Stopped
            }
            GroupResult::Failed(err) => {
                error!(service = %self.name, error = %err, "service run failed");
                self.status_tx.send_replace(RunStatus::Completed);
                RunOutcome::Failed(err)
            }
        };
        self.current_step_tx.send_replace(None);
        Ok(outcome)
    }

    async fn run_groups(
        &self,
        groups: &[StepGroup],
        ctx: &RunContext,
        control: &StepControl,
    ) -> Result<GroupResult, RunError> {
        for group in groups {
            self.current_step_tx.send_replace(Some(group.label()));
            match self.run_group(group, ctx, control).await? {
                GroupResult::Continue => {}
                other => return Ok(other),
            }
        }
        Ok(GroupResult::Continue)
    }

    async fn run_group(
        &self,
        group: &StepGroup,
        ctx: &RunContext,
        control: &StepControl,
    ) -> Result<GroupResult, RunError> {
        let steps: Vec<&Step> = match group {
            StepGroup::Single(step) => vec![step],
            StepGroup::Parallel(steps) => steps.iter().collect(),
        };
        let started = steps.iter().map(|step| step.start(ctx, control));
        let outcomes = futures::future::join_all(started)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let mut stopped = false;
        let mut failure = None;
        for (step, outcome) in steps.into_iter().zip(outcomes) {
            match outcome {
                StepOutcome::Completed => {}
                StepOutcome::Cancelled => stopped = true,
                StepOutcome::Failed(err) => {
                    // The whole group settles first; only then is the
                    // failing step's edge taken.
                    self.run_failure_branch(step, ctx, control).await?;
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
            }
        }
        Ok(match failure {
            Some(err) => GroupResult::Failed(err),
            None if stopped => GroupResult::Stopped,
            None => GroupResult::Continue,
        })
    }

    /// Run every step attached to `step`'s failure edge as one join.
    /// Branch steps get no edge of their own; their failures are logged.
    async fn run_failure_branch(
        &self,
        step: &Step,
        ctx: &RunContext,
        control: &StepControl,
    ) -> Result<(), RunError> {
        let branch = step.failure_branch();
        if branch.is_empty() {
            return Ok(());
        }
        info!(service = %self.name, step = %step.name(), "taking failure edge");
        let started = branch.iter().map(|s| s.start(ctx, control));
        for (branch_step, outcome) in branch
            .iter()
            .zip(futures::future::join_all(started).await)
        {
            match outcome? {
                StepOutcome::Completed => {}
                StepOutcome::Cancelled => {
                    warn!(step = %branch_step.name(), "failure branch step stopped")
                }
                StepOutcome::Failed(err) => {
                    warn!(step = %branch_step.name(), error = %err, "failure branch step failed")
                }
            }
        }
        Ok(())
    }

    /// Run on a supervised task; the returned handle controls and joins it.
    pub fn spawn(self, ctx: RunContext) -> RunHandle {
        let id = self.id;
        let name = self.name.clone();
        let status_tx = self.status_tx.clone();
        let status = self.status_tx.subscribe();
        let control = self.control_tx.clone();
        let current_step = self.current_step_tx.subscribe();

        let join = tokio::spawn(async move { self.run(&ctx).await });
        RunHandle {
            id,
            name,
            status,
            status_tx,
            control,
            current_step,
            join,
        }
    }
}

/// Remote control and join handle for a spawned [`ServiceRun`].
pub struct RunHandle {
    id: Uuid,
    name: String,
    status: watch::Receiver<RunStatus>,
    status_tx: Arc<watch::Sender<RunStatus>>,
    control: Arc<watch::Sender<ControlSignal>>,
    current_step: watch::Receiver<Option<String>>,
    join: JoinHandle<Result<RunOutcome, RunError>>,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub fn current_step(&self) -> Option<String> {
        self.current_step.borrow().clone()
    }

    /// Ask the run to stop; in-flight waits are torn down at the next
    /// suspension point.
    pub fn stop(&self) {
        self.control.send_replace(ControlSignal::Stop);
    }

    /// Hold the run at its next suspension point. No effect on a run
    /// that already finished.
    pub fn pause(&self) {
        self.control.send_replace(ControlSignal::Pause);
        self.status_tx.send_if_modified(|status| match *status {
            RunStatus::Completed | RunStatus::Stopped => false,
            _ => {
                *status = RunStatus::Paused;
                true
            }
        });
    }

    pub fn resume(&self) {
        self.control.send_replace(ControlSignal::Run);
        self.status_tx.send_if_modified(|status| match *status {
            RunStatus::Paused => {
                *status = RunStatus::Running;
                true
            }
            _ => false,
        });
    }

    pub async fn join(self) -> Result<RunOutcome, RunError> {
        self.join.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepBody;
    use crate::steps::CustomAction;
    use crate::testing::test_context;
    use std::sync::Mutex;
    use std::time::Duration;

    fn recording_step(name: &str, log: Arc<Mutex<Vec<String>>>) -> Step {
        let tag = name.to_string();
        Step::new(
            name,
            StepBody::Custom(CustomAction::new(move |_, _| {
                let log = log.clone();
                let tag = tag.clone();
                Box::pin(async move {
                    log.lock().unwrap().push(tag);
                    Ok(())
                })
            })),
        )
    }

    fn failing_step(name: &str) -> Step {
        Step::new(
            name,
            StepBody::Custom(CustomAction::new(|_, _| {
                Box::pin(async { Err(StepError::Collaborator(anyhow::anyhow!("boom"))) })
            })),
        )
    }

    fn blocking_step(name: &str) -> Step {
        Step::new(
            name,
            StepBody::Custom(CustomAction::new(|_, control| {
                Box::pin(async move {
                    control.stopped().await;
                    Err(StepError::Cancelled)
                })
            })),
        )
    }

    #[tokio::test]
    async fn test_groups_run_in_order() {
        let ctx = test_context();
        let log = Arc::new(Mutex::new(Vec::new()));
        let run = ServiceRun::new("ordered")
            .then(recording_step("first", log.clone()))
            .then(recording_step("second", log.clone()))
            .then(recording_step("third", log.clone()));

        assert!(matches!(run.run(&ctx).await, Ok(RunOutcome::Succeeded)));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(run.status(), RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_parallel_group_joins_all_siblings() {
        let ctx = test_context();
        let log = Arc::new(Mutex::new(Vec::new()));

        // A failing sibling must not cancel the slower one.
        let slow_log = log.clone();
        let slow = Step::new(
            "slow",
            StepBody::Custom(CustomAction::new(move |_, _| {
                let log = slow_log.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    log.lock().unwrap().push("slow".to_string());
                    Ok(())
                })
            })),
        );

        let run = ServiceRun::new("fanout")
            .then_all(vec![failing_step("fails"), slow])
            .then(recording_step("after", log.clone()));

        assert!(matches!(run.run(&ctx).await, Ok(RunOutcome::Failed(_))));
        assert_eq!(*log.lock().unwrap(), vec!["slow"], "sibling ran to completion");
        // Failure is carried by the outcome, not a dedicated status.
        assert_eq!(run.status(), RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_failure_edge_runs_then_walk_stops() {
        let ctx = test_context();
        let log = Arc::new(Mutex::new(Vec::new()));
        let run = ServiceRun::new("fallback")
            .then(failing_step("breaks").on_failure(recording_step("cleanup", log.clone())))
            .then(recording_step("unreached", log.clone()));

        assert!(matches!(run.run(&ctx).await, Ok(RunOutcome::Failed(_))));
        assert_eq!(*log.lock().unwrap(), vec!["cleanup"]);
    }

    #[tokio::test]
    async fn test_failure_edge_waits_for_siblings() {
        let ctx = test_context();
        let log = Arc::new(Mutex::new(Vec::new()));

        let slow_log = log.clone();
        let slow = Step::new(
            "slow",
            StepBody::Custom(CustomAction::new(move |_, _| {
                let log = slow_log.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    log.lock().unwrap().push("slow".to_string());
                    Ok(())
                })
            })),
        );

        let run = ServiceRun::new("settle_first").then_all(vec![
            failing_step("breaks").on_failure(recording_step("cleanup", log.clone())),
            slow,
        ]);

        assert!(matches!(run.run(&ctx).await, Ok(RunOutcome::Failed(_))));
        // The edge only fires after the whole group settled.
        assert_eq!(*log.lock().unwrap(), vec!["slow", "cleanup"]);
    }

    #[tokio::test]
    async fn test_stop_ends_run_as_stopped() {
        let ctx = test_context();
        let handle = ServiceRun::new("stoppable")
            .then(blocking_step("waits"))
            .spawn(ctx);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.status(), RunStatus::Running);
        assert_eq!(handle.current_step(), Some("waits".to_string()));

        handle.stop();
        assert!(matches!(handle.join().await, Ok(RunOutcome::Stopped)));
    }

    #[tokio::test]
    async fn test_pause_holds_next_step() {
        let ctx = test_context();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = ServiceRun::new("pausable")
            .then(recording_step("one", log.clone()))
            .then(recording_step("two", log.clone()))
            .spawn(ctx);

        handle.pause();
        assert_eq!(handle.status(), RunStatus::Paused);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(log.lock().unwrap().is_empty(), "steps held at the gate");

        handle.resume();
        assert!(matches!(handle.join().await, Ok(RunOutcome::Succeeded)));
        assert_eq!(*log.lock().unwrap(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_finished_run_ignores_pause_and_resume() {
        let ctx = test_context();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = ServiceRun::new("done")
            .then(recording_step("only", log.clone()))
            .spawn(ctx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.status(), RunStatus::Completed);

        handle.resume();
        assert_eq!(handle.status(), RunStatus::Completed);
        handle.pause();
        assert_eq!(handle.status(), RunStatus::Completed);

        assert!(matches!(handle.join().await, Ok(RunOutcome::Succeeded)));
    }

    #[tokio::test]
    async fn test_reentrant_run_is_rejected() {
        let ctx = test_context();
        let run = Arc::new(ServiceRun::new("exclusive").then(blocking_step("waits")));

        let background = tokio::spawn({
            let run = run.clone();
            let ctx = ctx.clone();
            async move { run.run(&ctx).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(
            run.run(&ctx).await,
            Err(RunError::AlreadyRunning { .. })
        ));

        run.control_tx.send_replace(ControlSignal::Stop);
        assert!(matches!(
            background.await.unwrap(),
            Ok(RunOutcome::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_terminal_step_rejects_second_run() {
        let ctx = test_context();
        let log = Arc::new(Mutex::new(Vec::new()));
        let run = ServiceRun::new("oneshot").then(recording_step("only", log.clone()));

        assert!(matches!(run.run(&ctx).await, Ok(RunOutcome::Succeeded)));
        assert!(matches!(
            run.run(&ctx).await,
            Err(RunError::StepAlreadyTerminal { .. })
        ));
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
