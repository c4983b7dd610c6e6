//! Shared dependencies handed to every step.

use std::sync::Arc;

use statebus::{CorrelationWaiter, StateAggregator};

use crate::collaborators::Collaborators;
use crate::config::Config;

/// Everything a step needs to execute: the state layer, the correlation
/// waiter on top of it, the external collaborators, and configuration.
///
/// Cheap to clone; all members are handles.
#[derive(Clone)]
pub struct RunContext {
    pub aggregator: Arc<StateAggregator>,
    pub waiter: Arc<CorrelationWaiter>,
    pub collaborators: Collaborators,
    pub config: Arc<Config>,
    /// Shared client for plain HTTP steps; dispatch traffic goes through
    /// [`crate::collaborators::DispatchApi`] instead.
    pub http: reqwest::Client,
}

impl RunContext {
    pub fn new(
        aggregator: Arc<StateAggregator>,
        collaborators: Collaborators,
        config: Config,
    ) -> Self {
        let waiter = Arc::new(CorrelationWaiter::new(aggregator.clone()));
        Self {
            aggregator,
            waiter,
            collaborators,
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }
}
