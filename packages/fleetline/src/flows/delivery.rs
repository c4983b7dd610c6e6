//! Delivery patrol over the monitored occupancy zones.

use crate::config::Config;
use crate::service::ServiceRun;
use crate::step::{Step, StepBody};
use crate::steps::OccupancyPatrol;

/// Build a delivery run: one bounded patrol over the occupancy feed,
/// optionally serving an ad-hoc `start_zone` before the differential
/// rounds begin.
pub fn delivery_flow(config: &Config, start_zone: Option<String>) -> ServiceRun {
    let patrol = OccupancyPatrol::from_config(config, start_zone);
    ServiceRun::new("delivery_round").then(Step::new("patrol", StepBody::Patrol(patrol)))
}
