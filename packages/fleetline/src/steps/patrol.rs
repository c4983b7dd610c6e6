//! Occupancy-driven delivery patrol.
//!
//! The patrol polls the zone-occupancy feed at a fixed interval for a
//! bounded number of rounds. An occupancy change must survive one extra
//! poll before it is acted on (single-poll blips are sensor noise). Among
//! newly occupied zones the lexicographically smallest unserviced one is
//! the dispatch target; a zone is serviced once per run and only becomes
//! eligible again after an intervening vacancy. When zones vacate and the
//! robot is out with nothing left to serve, it returns to base once.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::Config;
use crate::context::RunContext;
use crate::error::StepError;
use crate::request::Activity;
use crate::step::{cancellable_sleep, StepControl};
use crate::steps::{DeviceCommand, RoboticDispatch};

pub struct OccupancyPatrol {
    pub robot: String,
    pub fleet: String,
    pub base_zone: String,
    /// Ad-hoc zone serviced before any differential logic.
    pub start_zone: Option<String>,
    pub rounds: u32,
    pub poll_interval: Duration,
    /// Dwell at a delivery target while the chime plays and items are taken.
    pub dwell: Duration,
}

impl OccupancyPatrol {
    pub fn from_config(config: &Config, start_zone: Option<String>) -> Self {
        Self {
            robot: config.patrol_robot.clone(),
            fleet: config.default_fleet.clone(),
            base_zone: config.patrol_base_zone.clone(),
            start_zone,
            rounds: config.patrol_max_rounds,
            poll_interval: config.occupancy_confirm_delay,
            dwell: config.patrol_dwell,
        }
    }

    pub(crate) async fn run(
        &self,
        ctx: &RunContext,
        control: &StepControl,
    ) -> Result<(), StepError> {
        let feed = ctx.collaborators.occupancy.clone();
        let mut last_confirmed: BTreeSet<String> = BTreeSet::new();
        let mut serviced: BTreeSet<String> = BTreeSet::new();
        let mut pending_confirm = false;
        let mut robot_out = false;

        if let Some(zone) = &self.start_zone {
            info!(zone = %zone, "servicing requested zone before patrol");
            serviced.insert(zone.clone());
            robot_out = true;
            self.deliver(ctx, control, zone).await?;
        }

        for round in 0..self.rounds {
            control.gate().await?;
            let observed = feed.occupied_zones();

            if observed == last_confirmed {
                if pending_confirm {
                    debug!(round, "occupancy blip reverted, no action");
                    pending_confirm = false;
                }
            } else if !pending_confirm {
                // First sighting is provisional.
                pending_confirm = true;
                debug!(round, ?observed, "occupancy change sighted, confirming");
            } else {
                pending_confirm = false;
                let newly: BTreeSet<String> =
                    observed.difference(&last_confirmed).cloned().collect();
                for vacated in last_confirmed.difference(&observed) {
                    serviced.remove(vacated);
                }
                last_confirmed = observed;

                // BTreeSet iteration is ordered, so the first unserviced
                // member is the lexicographically smallest.
                if let Some(target) = newly.iter().find(|z| !serviced.contains(*z)).cloned() {
                    info!(round, zone = %target, "zone newly occupied, dispatching");
                    serviced.insert(target.clone());
                    robot_out = true;
                    self.deliver(ctx, control, &target).await?;
                } else if newly.is_empty()
                    && robot_out
                    && last_confirmed.iter().all(|z| serviced.contains(z))
                {
                    info!(round, base = %self.base_zone, "zones vacated, returning robot");
                    self.return_to_base(ctx, control).await?;
                    robot_out = false;
                }
            }

            cancellable_sleep(self.poll_interval, control).await?;
        }

        info!(rounds = self.rounds, "patrol rounds exhausted");
        Ok(())
    }

    async fn deliver(
        &self,
        ctx: &RunContext,
        control: &StepControl,
        zone: &str,
    ) -> Result<(), StepError> {
        RoboticDispatch::new(&self.robot, &self.fleet, Activity::zone(zone))
            .run(ctx, control)
            .await?;
        DeviceCommand::chime(self.dwell).run(ctx, control).await
    }

    async fn return_to_base(
        &self,
        ctx: &RunContext,
        control: &StepControl,
    ) -> Result<(), StepError> {
        RoboticDispatch::new(&self.robot, &self.fleet, Activity::go_to_place(&self.base_zone))
            .run(ctx, control)
            .await
    }
}
