//! Detection-driven workflow triggers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use statebus::DetectionEvent;

use crate::context::RunContext;
use crate::flows::{bed_exit_flow, delivery_flow};
use crate::ingest::SensorIngest;
use crate::service::{RunOutcome, ServiceRun};

/// Listens to the detection feed and starts the matching workflow per
/// enabled trigger. Every started run is supervised on its own task and
/// its outcome logged.
pub struct TriggerManager {
    ctx: RunContext,
    ingest: Arc<SensorIngest>,
    started: AtomicUsize,
}

impl TriggerManager {
    pub fn new(ctx: RunContext, ingest: Arc<SensorIngest>) -> Self {
        Self {
            ctx,
            ingest,
            started: AtomicUsize::new(0),
        }
    }

    /// Start the detection listener; also launches the delivery patrol if
    /// enabled. Returns the listener's task handle.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        if self.ctx.config.enable_delivery_flow {
            self.start_delivery(None);
        }
        // Subscribe here, not on the spawned task, so detections arriving
        // right after start are not lost.
        let rx = self.ingest.subscribe();
        tokio::spawn(async move { self.listen(rx).await })
    }

    /// Launch one delivery patrol, optionally serving `start_zone` first.
    pub fn start_delivery(&self, start_zone: Option<String>) {
        self.launch(delivery_flow(&self.ctx.config, start_zone));
    }

    /// Runs started so far, including finished ones.
    pub fn started_runs(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    async fn listen(&self, mut rx: broadcast::Receiver<DetectionEvent>) {
        info!("trigger manager listening for detections");
        loop {
            match rx.recv().await {
                Ok(event) => self.handle_detection(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "trigger feed lagged behind detections");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("detection feed closed, trigger manager exiting");
    }

    fn handle_detection(&self, event: DetectionEvent) {
        if event.classification != "bed_exit" {
            return;
        }
        if !self.ctx.config.enable_bed_exit_flow {
            info!("bed exit detection ignored, flow disabled");
            return;
        }
        let Some(zone) = event.zones.first() else {
            warn!("bed exit detection without a zone, ignored");
            return;
        };
        // The transport appends a clip reference after the direction.
        let direction = event
            .direction
            .as_deref()
            .map(|d| d.split('/').next().unwrap_or(d))
            .unwrap_or("right");

        info!(zone = %zone, direction, "bed exit detected, starting responder flow");
        self.launch(bed_exit_flow(&self.ctx.config, zone, direction));
    }

    fn launch(&self, run: ServiceRun) {
        let name = run.name().to_string();
        let id = run.id();
        let handle = run.spawn(self.ctx.clone());
        self.started.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            match handle.join().await {
                Ok(RunOutcome::Succeeded) => info!(service = %name, %id, "run completed"),
                Ok(RunOutcome::Stopped) => info!(service = %name, %id, "run stopped"),
                Ok(RunOutcome::Failed(err)) => {
                    error!(service = %name, %id, error = %err, "run failed")
                }
                Err(err) => error!(service = %name, %id, error = %err, "run task ended abnormally"),
            }
        });
    }
}
