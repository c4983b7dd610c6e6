//! External collaborators the step engine talks through.
//!
//! Every IO surface is a trait taken as `Arc<dyn ...>` so flows can be
//! exercised against in-memory fakes. The production implementations live
//! here too; only the dispatch endpoint has one (HTTP), device commands and
//! alerts are wired per deployment.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use statebus::AlertRecord;

use crate::request::{DispatchResponse, TaskRequest};

/// Submits task requests to the fleet dispatch endpoint.
#[async_trait]
pub trait DispatchApi: Send + Sync {
    async fn submit(&self, request: &TaskRequest) -> Result<DispatchResponse>;
}

/// Fields supplied when raising a new alert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAlert {
    pub original_id: String,
    pub category: String,
    pub alert_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub robot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
}

/// Persists alerts and records operator responses.
///
/// The notification step publishes the created record onto the
/// aggregator's alert stream itself; implementations are responsible for
/// feeding later operator responses into that same stream.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn create_alert(&self, alert: NewAlert) -> Result<AlertRecord>;
}

/// Publishes device commands (robot vendor topics, smart fixtures).
#[async_trait]
pub trait DeviceBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()>;
}

/// Zones seen occupied since the previous poll.
///
/// Each read closes the current scan window and opens the next one.
pub trait OccupancyFeed: Send + Sync {
    fn occupied_zones(&self) -> BTreeSet<String>;
}

/// Production dispatch client over the fleet HTTP endpoint.
///
/// Pinned requests go to `/tasks/robot_task`, unpinned ones to
/// `/tasks/dispatch_task`.
pub struct HttpDispatchApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDispatchApi {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { client, base_url }
    }
}

#[async_trait]
impl DispatchApi for HttpDispatchApi {
    async fn submit(&self, request: &TaskRequest) -> Result<DispatchResponse> {
        let path = if request.robot.is_some() && request.fleet.is_some() {
            "/tasks/robot_task"
        } else {
            "/tasks/dispatch_task"
        };
        let url = format!("{}{}", self.base_url, path);
        info!(%url, robot = ?request.robot, "submitting task request");

        let response = self
            .client
            .post(&url)
            .json(&request.payload())
            .send()
            .await
            .with_context(|| format!("failed to reach dispatch endpoint at {url}"))?
            .error_for_status()
            .context("dispatch endpoint returned an error status")?;

        response
            .json::<DispatchResponse>()
            .await
            .context("failed to decode dispatch response")
    }
}

/// Bundle of collaborator handles passed into every run.
#[derive(Clone)]
pub struct Collaborators {
    pub dispatch: Arc<dyn DispatchApi>,
    pub alerts: Arc<dyn AlertRepository>,
    pub devices: Arc<dyn DeviceBus>,
    pub occupancy: Arc<dyn OccupancyFeed>,
}
