//! Bed-exit response: alert the ward, send the responder, play the
//! reassurance sequence.

use crate::config::Config;
use crate::request::Activity;
use crate::service::ServiceRun;
use crate::step::{Step, StepBody};
use crate::steps::{DeviceCommand, Notification, RoboticDispatch};

const PRE_EXIT_UTTERANCE: &str =
    "Bed exit detected. Attention. Please do not come out of the bed for your safety.";

/// Build the bed-exit run for a detection in `zone` exiting toward
/// `direction` (`"left"` or anything else, treated as right).
///
/// The run is gated on a nurse acknowledging the alert; accepting it sends
/// the responder to the matching bedside waypoint while the tablet asks
/// the patient to stay put, then plays the full bed-exit sequence once the
/// responder is in place.
pub fn bed_exit_flow(config: &Config, zone: &str, direction: &str) -> ServiceRun {
    let (place, angle) = if direction == "left" {
        ("bed_left", -45.0)
    } else {
        ("bed_right", -135.0)
    };

    let alert = Notification::new("bed_exit", "iso_nurse")
        .ack_gated()
        .at_location(zone)
        .with_message_action("telepresence");

    let hold_message = DeviceCommand::tablet_tts(&config.tablet_id, PRE_EXIT_UTTERANCE);

    let responder = RoboticDispatch::new(
        &config.responder_robot,
        &config.default_fleet,
        Activity::GoToPlace {
            waypoint: place.to_string(),
            facing_deg: Some(angle),
        },
    );

    let sequence = DeviceCommand::tablet_sequence(
        &config.tablet_id,
        &config.bed_exit_sequence,
        config.responder_dwell,
    );

    ServiceRun::new("bed_exit")
        .then(Step::new("bed_exit_alert", StepBody::Notify(alert)))
        .then_all(vec![
            Step::new("pre_exit_audio", StepBody::Device(hold_message)),
            Step::new("send_responder", StepBody::Robotic(responder)),
        ])
        .then(Step::new("play_sequence", StepBody::Device(sequence)))
}
