use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::request::RequestId;

/// Tracks armed request deadlines independently of queue traffic.
///
/// The watcher only detects expiry; it never synthesizes outcomes. Whoever
/// drains expired ids is responsible for removing the queue entries and
/// routing the resulting timeouts. The entry set is expected to stay small
/// (tens of outstanding requests), so a flat map scan is fine.
#[derive(Debug, Default)]
pub struct TimeoutWatcher {
    entries: Mutex<HashMap<RequestId, Instant>>,
    rearm: Notify,
    stopped: AtomicBool,
}

impl TimeoutWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, id: RequestId, expires_at: Instant) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        self.entries.lock().insert(id, expires_at);
        self.rearm.notify_one();
    }

    pub fn disarm(&self, id: RequestId) {
        self.entries.lock().remove(&id);
    }

    pub fn is_armed(&self, id: RequestId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.lock().values().copied().min()
    }

    /// Remove and return every id whose deadline has passed.
    pub fn drain_expired(&self, now: Instant) -> Vec<RequestId> {
        let mut entries = self.entries.lock();
        let expired: Vec<RequestId> = entries
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            entries.remove(id);
        }
        expired
    }

    /// Detach all tracking. Used at shutdown; later arms are ignored.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.entries.lock().clear();
        self.rearm.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Resolves when the deadline set may have changed (new arm or stop).
    pub async fn rearmed(&self) {
        self.rearm.notified().await;
    }
}
