use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::channel::Channel;
use crate::request::{Request, RequestId};
use crate::timeout::TimeoutWatcher;

/// Requests older than this are swept opportunistically during removals.
/// Bounds queue growth when a response silently never arrives; the timeout
/// watcher remains the primary mechanism.
pub(crate) const STALE_AFTER: Duration = Duration::from_secs(15 * 60);

/// All not-yet-resolved outbound requests.
///
/// Not thread-safe on its own: every call happens under the queue manager's
/// lock. Owns timeout bookkeeping through the shared watcher.
pub(crate) struct RequestQueue {
    requests: BTreeMap<RequestId, Request>,
    next_id: RequestId,
    stale_after: Duration,
    watcher: Arc<TimeoutWatcher>,
}

impl RequestQueue {
    pub(crate) fn new(watcher: Arc<TimeoutWatcher>) -> Self {
        // Seed ids from wall-clock seconds so ids from a previous process
        // lifetime cannot collide with in-flight correlation ids server-side.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as RequestId)
            .unwrap_or(1)
            .max(1);
        Self {
            requests: BTreeMap::new(),
            next_id: seed,
            stale_after: STALE_AFTER,
            watcher,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Store a request, assign its id, and arm the timeout watcher when the
    /// request carries a timeout and expects a response.
    pub(crate) fn enqueue(&mut self, mut request: Request, now: Instant) -> RequestId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        request.assign_id(id);
        if !request.is_fire_and_forget() {
            if let Some(timeout) = request.timeout() {
                if !timeout.is_zero() {
                    let expires_at = now + timeout;
                    request.arm(expires_at);
                    self.watcher.arm(id, expires_at);
                }
            }
        }
        self.requests.insert(id, request);
        id
    }

    pub(crate) fn get(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(&id)
    }

    /// Remove a single entry, disarming its deadline.
    pub(crate) fn take(&mut self, id: RequestId) -> Option<Request> {
        let removed = self.requests.remove(&id);
        if removed.is_some() {
            self.watcher.disarm(id);
        }
        removed
    }

    /// Remove the matching entry and sweep out anything past the staleness
    /// bound. Swept requests are returned so the caller can synthesize a
    /// timeout outcome for each; nothing may vanish without one.
    pub(crate) fn remove(
        &mut self,
        id: RequestId,
        now: Instant,
    ) -> (Option<Request>, Vec<Request>) {
        let removed = self.take(id);
        let stale: Vec<RequestId> = self
            .requests
            .values()
            .filter(|request| request.age(now) > self.stale_after)
            .filter_map(|request| request.id())
            .collect();
        let swept = stale.into_iter().filter_map(|sid| self.take(sid)).collect();
        (removed, swept)
    }

    /// Inactive requests eligible for the given channel, in id order.
    /// Active requests are excluded so nothing is transmitted twice.
    pub(crate) fn eligible_mut(&mut self, channel: Channel) -> impl Iterator<Item = &mut Request> {
        self.requests
            .values_mut()
            .filter(move |request| !request.is_active() && request.auth_mode().eligible_on(channel))
    }

    pub(crate) fn has_eligible(&self, channel: Channel) -> bool {
        self.requests
            .values()
            .any(|request| !request.is_active() && request.auth_mode().eligible_on(channel))
    }

    /// Remove active requests with no outcome pending, optionally restricted
    /// to one channel. Used when a connection thread dies without being able
    /// to vouch for its in-flight deliveries.
    pub(crate) fn clear_active(
        &mut self,
        only: Option<Channel>,
        has_outcome: impl Fn(RequestId) -> bool,
    ) -> Vec<Request> {
        let ids: Vec<RequestId> = self
            .requests
            .iter()
            .filter(|(id, request)| {
                request.is_active()
                    && only.map_or(true, |channel| request.active_channel() == Some(channel))
                    && !has_outcome(**id)
            })
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().filter_map(|id| self.take(id)).collect()
    }

    /// Remove everything. Every removed request must surface as a synthesized
    /// timeout so no caller is left waiting forever.
    pub(crate) fn clear_all(&mut self) -> Vec<Request> {
        let drained: Vec<Request> = std::mem::take(&mut self.requests).into_values().collect();
        for request in &drained {
            if let Some(id) = request.id() {
                self.watcher.disarm(id);
            }
        }
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
