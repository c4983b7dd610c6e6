//! Device commands over the message bus.

use std::time::Duration;

use serde_json::Value;
use tracing::info;

use crate::context::RunContext;
use crate::error::StepError;
use crate::step::{cancellable_sleep, StepControl};

/// Publish one command to a device topic, then dwell while the device
/// carries it out.
///
/// There is no feedback channel for these devices; the dwell is the
/// contract. A robot chime takes the audio's length, a tablet sequence
/// takes however long the sequence plays.
pub struct DeviceCommand {
    pub topic: String,
    pub payload: Value,
    pub dwell: Duration,
}

impl DeviceCommand {
    pub fn new(topic: impl Into<String>, payload: Value, dwell: Duration) -> Self {
        Self {
            topic: topic.into(),
            payload,
            dwell,
        }
    }

    /// The arrival chime played on reaching a delivery target.
    pub fn chime(dwell: Duration) -> Self {
        Self::new("/robot/playSound", serde_json::json!({ "audio": "1" }), dwell)
    }

    /// Play a named tablet sequence on a specific device.
    pub fn tablet_sequence(device_id: &str, sequence_id: &str, dwell: Duration) -> Self {
        Self::new(
            format!("temi/{device_id}/command/sequence/play"),
            serde_json::json!({ "sequence_id": sequence_id }),
            dwell,
        )
    }

    /// Speak an utterance on a specific device, no dwell.
    pub fn tablet_tts(device_id: &str, utterance: &str) -> Self {
        Self::new(
            format!("temi/{device_id}/command/tts"),
            serde_json::json!({ "utterance": utterance }),
            Duration::ZERO,
        )
    }

    pub(crate) async fn run(
        &self,
        ctx: &RunContext,
        control: &StepControl,
    ) -> Result<(), StepError> {
        ctx.collaborators
            .devices
            .publish(&self.topic, self.payload.clone())
            .await?;
        info!(topic = %self.topic, dwell = ?self.dwell, "device command published");

        if !self.dwell.is_zero() {
            cancellable_sleep(self.dwell, control).await?;
        }
        Ok(())
    }
}
