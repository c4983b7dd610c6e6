//! Operator notifications raised as alerts.

use tracing::info;
use uuid::Uuid;

use statebus::{StateKind, StatePayload, Verdict};

use crate::collaborators::NewAlert;
use crate::context::RunContext;
use crate::error::StepError;
use crate::step::{await_verdict, StepControl};

/// Raise an alert for a user group, optionally waiting until someone acts
/// on it.
///
/// The alert id is `"{alert_type}-{uuid}"`; responses reference it through
/// their `original_id`, so the wait matches on that field. Acknowledge and
/// accept complete the step, reject and cancel fail it with
/// [`StepError::AlertDeclined`]. Without `need_ack` the step completes as
/// soon as the alert is stored and published.
pub struct Notification {
    pub alert_type: String,
    pub user_group: String,
    pub robot_id: Option<String>,
    pub service_id: Option<String>,
    pub location: Option<String>,
    pub patient_id: Option<String>,
    /// Action offered to the operator, e.g. a telepresence launch.
    pub message_action: Option<String>,
    pub other: Option<String>,
    pub need_ack: bool,
}

impl Notification {
    pub fn new(alert_type: impl Into<String>, user_group: impl Into<String>) -> Self {
        Self {
            alert_type: alert_type.into(),
            user_group: user_group.into(),
            robot_id: None,
            service_id: None,
            location: None,
            patient_id: None,
            message_action: None,
            other: None,
            need_ack: false,
        }
    }

    pub fn ack_gated(mut self) -> Self {
        self.need_ack = true;
        self
    }

    pub fn at_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_message_action(mut self, action: impl Into<String>) -> Self {
        self.message_action = Some(action.into());
        self
    }

    pub(crate) async fn run(
        &self,
        ctx: &RunContext,
        control: &StepControl,
    ) -> Result<(), StepError> {
        let alert_id = format!("{}-{}", self.alert_type, Uuid::new_v4());

        let record = ctx
            .collaborators
            .alerts
            .create_alert(NewAlert {
                original_id: alert_id.clone(),
                category: "default".to_string(),
                alert_type: self.alert_type.clone(),
                robot_id: self.robot_id.clone(),
                service_id: self.service_id.clone(),
                location: self.location.clone(),
                patient_id: self.patient_id.clone(),
                user_group: Some(self.user_group.clone()),
                message_action: self.message_action.clone(),
                other: self.other.clone(),
            })
            .await?;
        info!(alert_id = %alert_id, alert_type = %self.alert_type, "alert raised");

        // Make the fresh alert visible to monitors before any response to
        // it can arrive.
        ctx.aggregator
            .update(record.id.clone(), StatePayload::Alert(record));

        if !self.need_ack {
            return Ok(());
        }

        let wanted = alert_id.clone();
        let handle = ctx.waiter.wait_until(
            StateKind::Alert,
            format!("alert:{alert_id}").into(),
            move |update| {
                let Some(alert) = update.payload.as_alert() else {
                    return Verdict::Pending;
                };
                if alert.original_id != wanted {
                    return Verdict::Pending;
                }
                match &alert.user_action {
                    Some(action) if action.is_positive_terminal() => Verdict::Success,
                    Some(action) if action.is_negative_terminal() => Verdict::Failure,
                    _ => Verdict::Pending,
                }
            },
        );

        match await_verdict(handle, control).await? {
            Verdict::Success => {
                info!(alert_id = %alert_id, "alert acknowledged");
                Ok(())
            }
            _ => Err(StepError::AlertDeclined { alert_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::ControlSignal;
    use crate::testing::TestHarness;
    use statebus::UserAction;

    #[tokio::test]
    async fn test_fire_and_forget_completes_without_response() {
        let harness = TestHarness::new();
        let (_tx, control) = StepControl::channel();

        let step = Notification::new("round_complete", "nurses");
        assert!(step.run(&harness.ctx, &control).await.is_ok());

        let created = harness.alerts.created();
        assert_eq!(created.len(), 1);
        assert!(created[0].original_id.starts_with("round_complete-"));
        assert_eq!(harness.ctx.waiter.live_count(), 0);
    }

    #[tokio::test]
    async fn test_ack_completes_step() {
        let harness = TestHarness::new();
        let (_tx, control) = StepControl::channel();

        let run = tokio::spawn({
            let ctx = harness.ctx.clone();
            async move {
                Notification::new("bed_exit", "nurses")
                    .ack_gated()
                    .run(&ctx, &control)
                    .await
            }
        });

        harness.wait_for_live_wait().await;
        let alert_id = harness.alerts.last_original_id();
        harness.respond_to_alert(&alert_id, UserAction::Acknowledge);

        assert!(run.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_reject_fails_step() {
        let harness = TestHarness::new();
        let (_tx, control) = StepControl::channel();

        let run = tokio::spawn({
            let ctx = harness.ctx.clone();
            async move {
                Notification::new("bed_exit", "nurses")
                    .ack_gated()
                    .run(&ctx, &control)
                    .await
            }
        });

        harness.wait_for_live_wait().await;
        let alert_id = harness.alerts.last_original_id();
        harness.respond_to_alert(&alert_id, UserAction::Reject);

        assert!(matches!(
            run.await.unwrap(),
            Err(StepError::AlertDeclined { .. })
        ));
    }

    #[tokio::test]
    async fn test_snooze_keeps_waiting_until_acknowledged() {
        let harness = TestHarness::new();
        let (_tx, control) = StepControl::channel();

        let run = tokio::spawn({
            let ctx = harness.ctx.clone();
            async move {
                Notification::new("bed_exit", "nurses")
                    .ack_gated()
                    .run(&ctx, &control)
                    .await
            }
        });

        harness.wait_for_live_wait().await;
        let alert_id = harness.alerts.last_original_id();

        harness.respond_to_alert(&alert_id, UserAction::Snooze);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!run.is_finished(), "snooze is not terminal");

        harness.respond_to_alert(&alert_id, UserAction::Acknowledge);
        assert!(run.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unrelated_alerts_do_not_resolve() {
        let harness = TestHarness::new();
        let (tx, control) = StepControl::channel();

        let run = tokio::spawn({
            let ctx = harness.ctx.clone();
            async move {
                Notification::new("bed_exit", "nurses")
                    .ack_gated()
                    .run(&ctx, &control)
                    .await
            }
        });

        harness.wait_for_live_wait().await;
        harness.respond_to_alert("some-other-alert", UserAction::Acknowledge);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!run.is_finished());

        tx.send(ControlSignal::Stop).ok();
        assert!(matches!(run.await.unwrap(), Err(StepError::Cancelled)));
    }
}
