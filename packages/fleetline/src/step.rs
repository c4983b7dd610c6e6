//! Steps: the unit of execution inside a service run.
//!
//! A step wraps one [`StepBody`] variant together with a terminal marker.
//! Completion and failure are terminal; a later restart of the same step
//! is rejected. A stop signal cancels the step without marking it
//! terminal, so a stopped run can be started again from scratch.
//!
//! Pause is cooperative: step bodies call [`StepControl::gate`] at their
//! suspension points and only there does a paused run actually hold.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use statebus::{Verdict, WaitHandle};

use crate::context::RunContext;
use crate::error::{RunError, StepError};
use crate::steps::{
    ApiCall, CustomAction, DeviceCommand, Notification, OccupancyPatrol, RoboticDispatch,
};

/// Desired execution state of a run, broadcast to all of its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Stop,
}

/// A step's read side of the run's control channel.
///
/// Clone freely; every clone observes the same signal. A closed channel
/// (the run handle dropped) reads as `Run` forever.
#[derive(Clone)]
pub struct StepControl {
    rx: watch::Receiver<ControlSignal>,
}

impl StepControl {
    pub(crate) fn new(rx: watch::Receiver<ControlSignal>) -> Self {
        Self { rx }
    }

    /// A control pair for driving steps directly.
    pub fn channel() -> (watch::Sender<ControlSignal>, Self) {
        let (tx, rx) = watch::channel(ControlSignal::Run);
        (tx, Self::new(rx))
    }

    pub fn current(&self) -> ControlSignal {
        *self.rx.borrow()
    }

    /// Resolves once the signal becomes [`ControlSignal::Stop`]. Never
    /// resolves if the sender is gone.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() == ControlSignal::Stop {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Suspension point: holds while paused, errors once stopped.
    pub async fn gate(&self) -> Result<(), StepError> {
        let mut rx = self.rx.clone();
        loop {
            let signal = *rx.borrow_and_update();
            match signal {
                ControlSignal::Run => return Ok(()),
                ControlSignal::Stop => return Err(StepError::Cancelled),
                ControlSignal::Pause => {
                    if rx.changed().await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Await a correlation wait, racing it against the stop signal.
///
/// On stop the wait is torn down before returning; the decisive update (if
/// it ever comes) resolves nothing.
pub async fn await_verdict(
    mut handle: WaitHandle,
    control: &StepControl,
) -> Result<Verdict, StepError> {
    tokio::select! {
        outcome = handle.outcome() => outcome.map_err(|_| StepError::Cancelled),
        _ = control.stopped() => {
            handle.cancel();
            Err(StepError::Cancelled)
        }
    }
}

/// Sleep that a stop signal interrupts and a pause extends.
pub async fn cancellable_sleep(duration: Duration, control: &StepControl) -> Result<(), StepError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => control.gate().await,
        _ = control.stopped() => Err(StepError::Cancelled),
    }
}

/// What a step actually does when it runs.
pub enum StepBody {
    /// Dispatch a fleet task and wait for its terminal milestone.
    Robotic(RoboticDispatch),
    /// Raise an alert, optionally waiting for an operator response.
    Notify(Notification),
    /// Publish a device command and dwell.
    Device(DeviceCommand),
    /// Fire a plain HTTP request.
    Api(ApiCall),
    /// Deployment-specific logic injected as a closure.
    Custom(CustomAction),
    /// Occupancy-driven delivery rounds.
    Patrol(OccupancyPatrol),
}

impl StepBody {
    async fn run(&self, ctx: &RunContext, control: &StepControl) -> Result<(), StepError> {
        match self {
            StepBody::Robotic(body) => body.run(ctx, control).await,
            StepBody::Notify(body) => body.run(ctx, control).await,
            StepBody::Device(body) => body.run(ctx, control).await,
            StepBody::Api(body) => body.run(ctx, control).await,
            StepBody::Custom(body) => body.run(ctx, control).await,
            StepBody::Patrol(body) => body.run(ctx, control).await,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            StepBody::Robotic(_) => "robotic",
            StepBody::Notify(_) => "notify",
            StepBody::Device(_) => "device",
            StepBody::Api(_) => "api",
            StepBody::Custom(_) => "custom",
            StepBody::Patrol(_) => "patrol",
        }
    }
}

/// How one invocation of a step ended.
#[derive(Debug)]
pub enum StepOutcome {
    Completed,
    Failed(StepError),
    /// Stopped before reaching a terminal state; the step may run again.
    Cancelled,
}

/// A named, single-shot unit of work with an optional failure edge.
pub struct Step {
    name: String,
    body: StepBody,
    on_failure: Vec<Step>,
    terminal: AtomicBool,
}

impl Step {
    pub fn new(name: impl Into<String>, body: StepBody) -> Self {
        Self {
            name: name.into(),
            body,
            on_failure: Vec::new(),
            terminal: AtomicBool::new(false),
        }
    }

    /// Attach a step to this step's failure edge. Multiple attached steps
    /// start together when the edge is taken.
    pub fn on_failure(mut self, step: Step) -> Self {
        self.on_failure.push(step);
        self
    }

    pub(crate) fn failure_branch(&self) -> &[Step] {
        &self.on_failure
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    /// Execute the step once.
    ///
    /// # Guarantees
    ///
    /// - A step that completed or failed refuses to start again.
    /// - A stop signal yields [`StepOutcome::Cancelled`] and leaves the
    ///   step restartable.
    /// - Errors from the body are folded into the outcome; the only `Err`
    ///   from this method is the restart rejection.
    pub async fn start(
        &self,
        ctx: &RunContext,
        control: &StepControl,
    ) -> Result<StepOutcome, RunError> {
        if self.is_terminal() {
            return Err(RunError::StepAlreadyTerminal {
                name: self.name.clone(),
            });
        }
        if control.gate().await.is_err() {
            return Ok(StepOutcome::Cancelled);
        }

        info!(step = %self.name, kind = self.body.kind(), "step started");
        match self.body.run(ctx, control).await {
            Ok(()) => {
                self.terminal.store(true, Ordering::SeqCst);
                info!(step = %self.name, "step completed");
                Ok(StepOutcome::Completed)
            }
            Err(err) if err.is_cancellation() => {
                info!(step = %self.name, "step cancelled");
                Ok(StepOutcome::Cancelled)
            }
            Err(err) => {
                self.terminal.store(true, Ordering::SeqCst);
                warn!(step = %self.name, error = %err, "step failed");
                Ok(StepOutcome::Failed(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_context;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting_step(name: &str, runs: Arc<AtomicUsize>, result: Result<(), ()>) -> Step {
        Step::new(
            name,
            StepBody::Custom(CustomAction::new(move |_ctx, _control| {
                let runs = runs.clone();
                Box::pin(async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    result.map_err(|_| StepError::Collaborator(anyhow::anyhow!("boom")))
                })
            })),
        )
    }

    #[tokio::test]
    async fn test_completed_step_rejects_restart() {
        let ctx = test_context();
        let (_tx, control) = StepControl::channel();
        let runs = Arc::new(AtomicUsize::new(0));
        let step = counting_step("once", runs.clone(), Ok(()));

        assert!(matches!(
            step.start(&ctx, &control).await,
            Ok(StepOutcome::Completed)
        ));
        assert!(matches!(
            step.start(&ctx, &control).await,
            Err(RunError::StepAlreadyTerminal { .. })
        ));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_step_is_terminal_too() {
        let ctx = test_context();
        let (_tx, control) = StepControl::channel();
        let runs = Arc::new(AtomicUsize::new(0));
        let step = counting_step("fails", runs.clone(), Err(()));

        assert!(matches!(
            step.start(&ctx, &control).await,
            Ok(StepOutcome::Failed(_))
        ));
        assert!(step.is_terminal());
        assert!(step.start(&ctx, &control).await.is_err());
    }

    #[tokio::test]
    async fn test_stopped_step_can_run_again() {
        let ctx = test_context();
        let (tx, control) = StepControl::channel();
        tx.send(ControlSignal::Stop).ok();

        let runs = Arc::new(AtomicUsize::new(0));
        let step = counting_step("stoppable", runs.clone(), Ok(()));

        assert!(matches!(
            step.start(&ctx, &control).await,
            Ok(StepOutcome::Cancelled)
        ));
        assert!(!step.is_terminal());
        assert_eq!(runs.load(Ordering::SeqCst), 0, "body never ran under stop");

        tx.send(ControlSignal::Run).ok();
        assert!(matches!(
            step.start(&ctx, &control).await,
            Ok(StepOutcome::Completed)
        ));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gate_holds_while_paused() {
        let (tx, control) = StepControl::channel();
        tx.send(ControlSignal::Pause).ok();

        let gated = control.clone();
        let handle = tokio::spawn(async move { gated.gate().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "gate must hold while paused");

        tx.send(ControlSignal::Run).ok();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_gate_errors_on_stop() {
        let (tx, control) = StepControl::channel();
        tx.send(ControlSignal::Stop).ok();
        assert!(matches!(control.gate().await, Err(StepError::Cancelled)));
    }

    #[tokio::test]
    async fn test_closed_channel_reads_as_run() {
        let (tx, control) = StepControl::channel();
        drop(tx);
        assert!(control.gate().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellable_sleep_interrupted_by_stop() {
        let (tx, control) = StepControl::channel();
        let sleeper = control.clone();
        let handle =
            tokio::spawn(async move { cancellable_sleep(Duration::from_secs(3600), &sleeper).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(ControlSignal::Stop).ok();
        assert!(matches!(handle.await.unwrap(), Err(StepError::Cancelled)));
    }
}
