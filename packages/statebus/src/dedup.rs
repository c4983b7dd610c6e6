//! Content-hash suppression of re-delivered messages.
//!
//! Transports upstream of the aggregator re-deliver: sensors repeat frames,
//! gateways replay on reconnect. [`Deduplicator`] fingerprints each message
//! by the SHA-256 of its canonical JSON form and drops anything whose
//! fingerprint is still inside a bounded sliding window, so memory stays
//! flat no matter how long the process runs.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Fingerprints retained before the oldest is evicted.
pub const DEFAULT_WINDOW: usize = 4096;

/// Sliding-window duplicate filter keyed by content hash.
///
/// # Guarantees
///
/// - A message is reported as fresh at most once while its fingerprint
///   remains inside the window.
/// - Eviction is strictly oldest-first; a fingerprint pushed out of the
///   window is treated as fresh again.
/// - Field order does not affect the fingerprint for `serde_json::Value`
///   maps, which serialize in key order.
pub struct Deduplicator {
    window: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// `window` of zero means every message is fresh.
    pub fn with_window(window: usize) -> Self {
        Self {
            window,
            inner: Mutex::new(Inner {
                seen: HashSet::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Record `message` and report whether it was previously unseen.
    ///
    /// Returns `true` for a fresh message (caller should process it) and
    /// `false` for a duplicate inside the window.
    pub fn observe<T: Serialize>(&self, message: &T) -> bool {
        if self.window == 0 {
            return true;
        }
        let hash = content_hash(message);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.seen.contains(&hash) {
            return false;
        }
        if inner.order.len() == self.window {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
            }
        }
        inner.order.push_back(hash.clone());
        inner.seen.insert(hash);
        true
    }

    /// Fingerprints currently held in the window.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("window", &self.window)
            .field("len", &self.len())
            .finish()
    }
}

/// SHA-256 of the canonical JSON rendering of `value`, as lowercase hex.
pub fn content_hash<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}
