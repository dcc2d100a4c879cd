use std::sync::{Arc, OnceLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::channel::Channel;
use crate::request::{EngineId, Request, RequestId};
use crate::request_queue::RequestQueue;
use crate::response_queue::{Outcome, OutcomeKind, ResponseQueue};
use crate::signing::SessionAuth;
use crate::timeout::TimeoutWatcher;
use crate::value::WireValue;

const OUTCOME_CHANNEL_CAPACITY: usize = 64;

/// Application hook for interpreting raw outcome payloads.
///
/// The transport core never understands payload items; classification and
/// push routing are delegated so the queues stay domain-agnostic.
pub trait OutcomePolicy: Send + Sync {
    /// Does this payload signal an invalid or expired session?
    fn is_session_error(&self, items: &[WireValue]) -> bool;

    /// Does this payload carry a server-reported error?
    fn is_server_error(&self, items: &[WireValue]) -> bool;

    /// Which subsystem owns an unsolicited push with this payload?
    fn route_push(&self, items: &[WireValue]) -> Option<EngineId>;
}

/// Escalation hook for session invalidation. Invoked outside the queue lock,
/// so implementations may call back into the queue manager (e.g. `clear_all`).
pub trait SessionEvents: Send + Sync {
    fn on_session_invalid(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishResult {
    Delivered(EngineId),
    SessionInvalidated,
    Dropped,
}

/// An encoded request handed to a dispatch pump for transmission.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub id: RequestId,
    pub fire_and_forget: bool,
    pub bytes: Bytes,
}

struct Inner {
    requests: RequestQueue,
    responses: ResponseQueue,
}

/// Single coordination point for both queues.
///
/// Every mutation of the request or response queue happens under one lock so
/// caller submits, transmissions, receives, and timeout sweeps never
/// interleave inconsistently. Constructed explicitly at process start and
/// shared by reference; there is no global instance.
pub struct QueueManager {
    inner: Mutex<Inner>,
    watcher: Arc<TimeoutWatcher>,
    policy: Arc<dyn OutcomePolicy>,
    session_events: RwLock<Option<Arc<dyn SessionEvents>>>,
    outcome_tx: broadcast::Sender<EngineId>,
    http_signal: Arc<Notify>,
    stream_signal: Arc<Notify>,
    supervisor: OnceLock<JoinHandle<()>>,
}

impl QueueManager {
    pub fn new(policy: Arc<dyn OutcomePolicy>) -> Self {
        let watcher = Arc::new(TimeoutWatcher::new());
        let (outcome_tx, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                requests: RequestQueue::new(Arc::clone(&watcher)),
                responses: ResponseQueue::new(),
            }),
            watcher,
            policy,
            session_events: RwLock::new(None),
            outcome_tx,
            http_signal: Arc::new(Notify::new()),
            stream_signal: Arc::new(Notify::new()),
            supervisor: OnceLock::new(),
        }
    }

    /// Register the session-invalidation handler. Set after construction
    /// because the handler usually holds a reference back to this manager.
    pub fn set_session_events(&self, events: Arc<dyn SessionEvents>) {
        *self.session_events.write() = Some(events);
    }

    /// Queue a request and wake the matching dispatch pumps.
    pub fn enqueue(&self, request: Request) -> RequestId {
        let id = self.enqueue_silent(request);
        self.notify_pending();
        id
    }

    /// Queue a request without waking anyone. Callers batching several
    /// enqueues follow up with a single `notify_pending`.
    pub fn enqueue_silent(&self, request: Request) -> RequestId {
        let operation = request.operation().to_string();
        let id = self.inner.lock().requests.enqueue(request, Instant::now());
        trace!(target: "rpc::queue", request_id = id, operation = %operation, "request queued");
        id
    }

    /// Wake the dispatch pump of every channel that has eligible requests.
    pub fn notify_pending(&self) {
        let (http, stream) = {
            let inner = self.inner.lock();
            (
                inner.requests.has_eligible(Channel::Http),
                inner.requests.has_eligible(Channel::Stream),
            )
        };
        if http {
            self.http_signal.notify_one();
        }
        if stream {
            self.stream_signal.notify_one();
        }
    }

    pub fn signal(&self, channel: Channel) -> Arc<Notify> {
        match channel {
            Channel::Http => Arc::clone(&self.http_signal),
            Channel::Stream => Arc::clone(&self.stream_signal),
        }
    }

    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<EngineId> {
        self.outcome_tx.subscribe()
    }

    /// Encode and hand over every inactive request eligible for the channel,
    /// marking each active so it cannot be transmitted twice.
    ///
    /// Session-required traffic is left queued until a session exists.
    pub fn drain_eligible(&self, channel: Channel, auth: &SessionAuth) -> Vec<OutboundFrame> {
        if channel == Channel::Stream && !auth.has_session() {
            trace!(target: "rpc::queue", "stream drain deferred until session established");
            return Vec::new();
        }
        let timestamp = unix_now();
        let mut out = Vec::new();
        let mut inner = self.inner.lock();
        for request in inner.requests.eligible_mut(channel) {
            let Some(id) = request.id() else { continue };
            match request.encode(auth, channel, timestamp) {
                Ok(bytes) => {
                    request.mark_active(channel);
                    out.push(OutboundFrame {
                        id,
                        fire_and_forget: request.is_fire_and_forget(),
                        bytes,
                    });
                }
                Err(err) => {
                    warn!(
                        target: "rpc::queue",
                        request_id = id,
                        error = %err,
                        "failed to encode request; leaving it queued"
                    );
                }
            }
        }
        out
    }

    /// Record that a frame left the wire. Fire-and-forget requests are
    /// dropped from tracking here; nothing further will arrive for them.
    pub fn mark_transmitted(&self, id: RequestId) {
        let mut inner = self.inner.lock();
        let fire_and_forget = inner
            .requests
            .get(id)
            .map(|request| request.is_fire_and_forget())
            .unwrap_or(false);
        if fire_and_forget {
            inner.requests.take(id);
            trace!(target: "rpc::queue", request_id = id, "fire-and-forget request released");
        }
    }

    /// Publish a decoded inbound payload.
    ///
    /// Session errors short-circuit into the session-events hook and are
    /// never enqueued: one logout beats every in-flight request rediscovering
    /// the same failure. Otherwise the correlated request resolves the owner
    /// (a reply carries no reliable source tag of its own) and is removed
    /// atomically with the outcome's insertion.
    pub fn publish_reply(
        &self,
        correlation: Option<RequestId>,
        items: Vec<WireValue>,
    ) -> PublishResult {
        if self.policy.is_session_error(&items) {
            warn!(target: "rpc::queue", "session invalidated by server; forcing logout");
            let events = self.session_events.read().clone();
            match events {
                Some(events) => events.on_session_invalid(),
                None => debug!(target: "rpc::queue", "no session-events handler registered"),
            }
            return PublishResult::SessionInvalidated;
        }

        let mut notified: Vec<EngineId> = Vec::new();
        let result = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            match correlation {
                Some(id) => {
                    let (request, swept) = inner.requests.remove(id, Instant::now());
                    synthesize_timeouts(&mut inner.responses, swept, &mut notified);
                    match request {
                        Some(request) => {
                            let kind = if self.policy.is_server_error(&items) {
                                OutcomeKind::ServerError
                            } else {
                                OutcomeKind::Normal
                            };
                            let owner = request.owner();
                            inner.responses.push(Outcome {
                                request_id: Some(id),
                                owner,
                                kind,
                                items,
                            });
                            notified.push(owner);
                            PublishResult::Delivered(owner)
                        }
                        None => {
                            debug!(
                                target: "rpc::queue",
                                request_id = id,
                                "dropping reply with no matching request"
                            );
                            PublishResult::Dropped
                        }
                    }
                }
                None => match self.policy.route_push(&items) {
                    Some(owner) => {
                        inner.responses.push(Outcome {
                            request_id: None,
                            owner,
                            kind: OutcomeKind::Push,
                            items,
                        });
                        notified.push(owner);
                        PublishResult::Delivered(owner)
                    }
                    None => {
                        debug!(target: "rpc::queue", "dropping unroutable push");
                        PublishResult::Dropped
                    }
                },
            }
        };
        self.notify_owners(notified);
        result
    }

    /// Pull the next outcome for a subsystem, if any. Non-blocking.
    pub fn claim(&self, owner: EngineId) -> Option<Outcome> {
        self.inner.lock().responses.claim(owner)
    }

    pub fn has_outcome(&self, owner: EngineId) -> bool {
        self.inner.lock().responses.has_outcome_for(owner)
    }

    /// Drain expired deadlines and convert each into a timeout outcome.
    pub fn sweep_expired(&self, now: Instant) {
        let mut notified: Vec<EngineId> = Vec::new();
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            for id in self.watcher.drain_expired(now) {
                if inner.responses.exists(id) {
                    continue;
                }
                if let Some(request) = inner.requests.take(id) {
                    debug!(
                        target: "rpc::queue",
                        request_id = id,
                        operation = %request.operation(),
                        "request timed out"
                    );
                    inner.responses.push(Outcome::timed_out(id, request.owner()));
                    notified.push(request.owner());
                }
            }
        }
        self.notify_owners(notified);
    }

    /// Remove active requests with no outcome pending and synthesize a
    /// timeout for each. Called when a connection terminates and cannot
    /// vouch for in-flight deliveries.
    pub fn clear_active(&self, only: Option<Channel>) {
        let mut notified: Vec<EngineId> = Vec::new();
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let responses = &inner.responses;
            let cleared = inner
                .requests
                .clear_active(only, |id| responses.exists(id));
            synthesize_timeouts(&mut inner.responses, cleared, &mut notified);
        }
        self.notify_owners(notified);
    }

    /// Hard disconnect: every outstanding request resolves as timed out.
    pub fn clear_all(&self) {
        let mut notified: Vec<EngineId> = Vec::new();
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let drained = inner.requests.clear_all();
            debug!(target: "rpc::queue", count = drained.len(), "clearing all outstanding requests");
            synthesize_timeouts(&mut inner.responses, drained, &mut notified);
        }
        self.notify_owners(notified);
    }

    pub fn outstanding_requests(&self) -> usize {
        self.inner.lock().requests.len()
    }

    pub fn queued_outcomes(&self) -> usize {
        self.inner.lock().responses.len()
    }

    /// Start the timeout supervisor: a task that sleeps until the earliest
    /// armed deadline and runs the expiry sweep, independent of traffic.
    pub fn start(self: &Arc<Self>) {
        if self.supervisor.get().is_some() {
            return;
        }
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                if manager.watcher.is_stopped() {
                    break;
                }
                let rearmed = manager.watcher.rearmed();
                match manager.watcher.next_deadline() {
                    Some(deadline) => {
                        let sleep =
                            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline));
                        tokio::select! {
                            _ = rearmed => {}
                            _ = sleep => manager.sweep_expired(Instant::now()),
                        }
                    }
                    None => rearmed.await,
                }
            }
        });
        let _ = self.supervisor.set(handle);
    }

    pub fn shutdown(&self) {
        self.watcher.stop();
        if let Some(handle) = self.supervisor.get() {
            handle.abort();
        }
    }

    fn notify_owners(&self, owners: Vec<EngineId>) {
        for owner in owners {
            let _ = self.outcome_tx.send(owner);
        }
    }
}

fn synthesize_timeouts(
    responses: &mut ResponseQueue,
    requests: Vec<Request>,
    notified: &mut Vec<EngineId>,
) {
    for request in requests {
        let Some(id) = request.id() else { continue };
        if responses.exists(id) {
            continue;
        }
        responses.push(Outcome::timed_out(id, request.owner()));
        notified.push(request.owner());
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
