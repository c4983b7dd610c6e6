//! Sensor ingest: dedup, detection fan-out, and the zone-occupancy view.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::debug;

use statebus::{Deduplicator, DetectionEvent};

use crate::collaborators::OccupancyFeed;

/// Zone identifier prefix that marks a monitored occupancy slot.
pub const OCCUPANCY_ZONE_PREFIX: &str = "comfort_";

/// Classification whose detections feed the occupancy view.
const OCCUPANCY_CLASSIFICATION: &str = "wheelchair";

const DETECTION_CHANNEL_CAPACITY: usize = 256;

/// Occupancy view over monitored zones, fed by [`SensorIngest`].
///
/// Detections accumulate between polls; each [`OccupancyFeed::occupied_zones`]
/// read takes the accumulated set and starts the next scan window, so a
/// zone whose detections stopped reads as vacated on the following poll.
/// A single poller owns the feed.
pub struct ZoneOccupancy {
    zones: Mutex<BTreeSet<String>>,
}

impl ZoneOccupancy {
    pub fn new() -> Self {
        Self {
            zones: Mutex::new(BTreeSet::new()),
        }
    }

    fn mark(&self, zones: &[String]) {
        let mut held = self.zones.lock().unwrap_or_else(|e| e.into_inner());
        for zone in zones {
            if zone.starts_with(OCCUPANCY_ZONE_PREFIX) {
                held.insert(zone.clone());
            }
        }
    }

}

impl Default for ZoneOccupancy {
    fn default() -> Self {
        Self::new()
    }
}

impl OccupancyFeed for ZoneOccupancy {
    fn occupied_zones(&self) -> BTreeSet<String> {
        std::mem::take(&mut *self.zones.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Entry point for upstream detection events.
///
/// Every event passes the deduplicator first; transports re-deliver and a
/// repeated frame must not double-count. Fresh events fan out on the
/// detection broadcast and, for occupancy classifications, update the
/// zone-occupancy view.
pub struct SensorIngest {
    dedup: Deduplicator,
    detections: broadcast::Sender<DetectionEvent>,
    occupancy: Arc<ZoneOccupancy>,
}

impl SensorIngest {
    pub fn new(dedup_window: usize) -> Self {
        let (detections, _) = broadcast::channel(DETECTION_CHANNEL_CAPACITY);
        Self {
            dedup: Deduplicator::with_window(dedup_window),
            detections,
            occupancy: Arc::new(ZoneOccupancy::new()),
        }
    }

    /// Feed one detection in. Returns `false` for a suppressed duplicate.
    pub fn ingest(&self, event: DetectionEvent) -> bool {
        if !self.dedup.observe(&event) {
            debug!(classification = %event.classification, "duplicate detection suppressed");
            return false;
        }
        if event.classification == OCCUPANCY_CLASSIFICATION {
            self.occupancy.mark(&event.zones);
        }
        // No subscribers is fine; the occupancy view still updated.
        let _ = self.detections.send(event);
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DetectionEvent> {
        self.detections.subscribe()
    }

    pub fn occupancy(&self) -> Arc<ZoneOccupancy> {
        self.occupancy.clone()
    }
}
