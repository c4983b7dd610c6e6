use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the fleet dispatch endpoint, e.g. `http://rmf-api:8000`.
    pub dispatch_base_url: String,
    /// Fleet to pin robot-specific requests to.
    pub default_fleet: String,
    /// Robot assigned to delivery patrols.
    pub patrol_robot: String,
    /// Robot sent to a bed on a bed-exit detection.
    pub responder_robot: String,
    /// Tablet device addressed by audio and sequence commands.
    pub tablet_id: String,
    /// Sequence played on the tablet once the responder arrives.
    pub bed_exit_sequence: String,
    /// How long the responder holds position while the sequence plays.
    pub responder_dwell: Duration,
    /// Zone the patrol robot visits first, before any occupancy target.
    pub patrol_start_zone: String,
    /// Zone the patrol robot returns to once every target is served.
    pub patrol_base_zone: String,
    /// Upper bound on delivery rounds in one patrol run.
    pub patrol_max_rounds: u32,
    /// How long an occupancy reading must hold before it is confirmed.
    pub occupancy_confirm_delay: Duration,
    /// Dwell time at a delivery target before moving on.
    pub patrol_dwell: Duration,
    /// Sliding-window size for the ingest deduplicator.
    pub dedup_window: usize,
    pub enable_bed_exit_flow: bool,
    pub enable_delivery_flow: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            dispatch_base_url: env::var("DISPATCH_BASE_URL")
                .context("DISPATCH_BASE_URL must be set")?,
            default_fleet: env::var("DEFAULT_FLEET")
                .unwrap_or_else(|_| "delivery".to_string()),
            patrol_robot: env::var("PATROL_ROBOT")
                .unwrap_or_else(|_| "pudu_1".to_string()),
            responder_robot: env::var("RESPONDER_ROBOT")
                .unwrap_or_else(|_| "temi_1".to_string()),
            tablet_id: env::var("TABLET_ID")
                .unwrap_or_else(|_| "temi_1".to_string()),
            bed_exit_sequence: env::var("BED_EXIT_SEQUENCE")
                .unwrap_or_else(|_| "bed_exit".to_string()),
            responder_dwell: Duration::from_secs(
                env::var("RESPONDER_DWELL_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("RESPONDER_DWELL_SECS must be a valid number")?,
            ),
            patrol_start_zone: env::var("PATROL_START_ZONE")
                .unwrap_or_else(|_| "pantry".to_string()),
            patrol_base_zone: env::var("PATROL_BASE_ZONE")
                .unwrap_or_else(|_| "base".to_string()),
            patrol_max_rounds: env::var("PATROL_MAX_ROUNDS")
                .unwrap_or_else(|_| "6".to_string())
                .parse()
                .context("PATROL_MAX_ROUNDS must be a valid number")?,
            occupancy_confirm_delay: Duration::from_secs(
                env::var("OCCUPANCY_CONFIRM_DELAY_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("OCCUPANCY_CONFIRM_DELAY_SECS must be a valid number")?,
            ),
            patrol_dwell: Duration::from_secs(
                env::var("PATROL_DWELL_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("PATROL_DWELL_SECS must be a valid number")?,
            ),
            dedup_window: env::var("DEDUP_WINDOW")
                .unwrap_or_else(|_| "4096".to_string())
                .parse()
                .context("DEDUP_WINDOW must be a valid number")?,
            enable_bed_exit_flow: env::var("ENABLE_BED_EXIT_FLOW")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            enable_delivery_flow: env::var("ENABLE_DELIVERY_FLOW")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dispatch_base_url: "http://localhost:8000".to_string(),
            default_fleet: "delivery".to_string(),
            patrol_robot: "pudu_1".to_string(),
            responder_robot: "temi_1".to_string(),
            tablet_id: "temi_1".to_string(),
            bed_exit_sequence: "bed_exit".to_string(),
            responder_dwell: Duration::from_secs(60),
            patrol_start_zone: "pantry".to_string(),
            patrol_base_zone: "base".to_string(),
            patrol_max_rounds: 6,
            occupancy_confirm_delay: Duration::from_secs(5),
            patrol_dwell: Duration::from_secs(30),
            dedup_window: 4096,
            enable_bed_exit_flow: true,
            enable_delivery_flow: true,
        }
    }
}
