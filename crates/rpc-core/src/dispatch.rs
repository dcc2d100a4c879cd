use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::channel::{Channel, ConnectivityHandle};
use crate::queue_manager::QueueManager;
use crate::request::RequestId;
use crate::signing::SessionAuth;
use crate::wire::{self, EnvelopeKind, WireError};

/// Credentials shared between the login flow and the dispatch pumps.
pub type SharedAuth = Arc<RwLock<SessionAuth>>;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Performs the actual I/O for one channel.
///
/// HTTP-style drivers return the reply body from `transmit`; streaming
/// drivers usually return `None` and feed inbound frames through
/// `ingest_stream_frame` from their own read loop.
#[async_trait]
pub trait ChannelDriver: Send + Sync {
    async fn transmit(&self, frame: Bytes) -> Result<Option<Bytes>, DriverError>;
}

/// Drains eligible requests for one channel and pushes replies back through
/// the queue manager.
///
/// On driver failure the channel is marked offline and its in-flight
/// requests are cleared so their owners see timeouts instead of silence.
pub struct DispatchPump {
    queues: Arc<QueueManager>,
    channel: Channel,
    driver: Arc<dyn ChannelDriver>,
    auth: SharedAuth,
    connectivity: ConnectivityHandle,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchPump {
    pub fn new(
        queues: Arc<QueueManager>,
        channel: Channel,
        driver: Arc<dyn ChannelDriver>,
        auth: SharedAuth,
        connectivity: ConnectivityHandle,
    ) -> Self {
        Self {
            queues,
            channel,
            driver,
            auth,
            connectivity,
            handle: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return;
        }
        let queues = Arc::clone(&self.queues);
        let channel = self.channel;
        let driver = Arc::clone(&self.driver);
        let auth = Arc::clone(&self.auth);
        let connectivity = self.connectivity.clone();
        *guard = Some(tokio::spawn(async move {
            run_pump(queues, channel, driver, auth, connectivity).await;
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

async fn run_pump(
    queues: Arc<QueueManager>,
    channel: Channel,
    driver: Arc<dyn ChannelDriver>,
    auth: SharedAuth,
    connectivity: ConnectivityHandle,
) {
    let signal = queues.signal(channel);
    let mut online_rx = connectivity.subscribe();
    loop {
        if !connectivity.is_online() {
            if online_rx.changed().await.is_err() {
                break;
            }
            continue;
        }

        let notified = signal.notified();
        let snapshot = auth.read().clone();
        let batch = queues.drain_eligible(channel, &snapshot);
        if batch.is_empty() {
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
            continue;
        }

        trace!(target: "rpc::dispatch", ?channel, count = batch.len(), "transmitting batch");
        for frame in batch {
            match driver.transmit(frame.bytes.clone()).await {
                Ok(reply) => {
                    queues.mark_transmitted(frame.id);
                    if let Some(bytes) = reply {
                        let ingested = match channel {
                            Channel::Http => ingest_http_reply(&queues, frame.id, &bytes),
                            Channel::Stream => ingest_stream_frame(&queues, &bytes),
                        };
                        if let Err(err) = ingested {
                            warn!(
                                target: "rpc::dispatch",
                                ?channel,
                                request_id = frame.id,
                                error = %err,
                                "discarding undecodable reply"
                            );
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        target: "rpc::dispatch",
                        ?channel,
                        request_id = frame.id,
                        error = %err,
                        "channel failed; clearing in-flight requests"
                    );
                    connectivity.set_offline();
                    queues.clear_active(Some(channel));
                    break;
                }
            }
        }
    }
    debug!(target: "rpc::dispatch", ?channel, "dispatch pump stopped");
}

/// Decode and publish the reply body of a direct HTTP call.
pub fn ingest_http_reply(
    queues: &QueueManager,
    request_id: RequestId,
    bytes: &[u8],
) -> Result<(), WireError> {
    let items = wire::decode_items(bytes)?;
    queues.publish_reply(Some(request_id), items);
    Ok(())
}

/// Decode and publish one inbound streaming-channel frame (solicited
/// response or unsolicited push).
pub fn ingest_stream_frame(queues: &QueueManager, bytes: &[u8]) -> Result<(), WireError> {
    let envelope = wire::decode_envelope(bytes)?;
    match envelope.kind {
        EnvelopeKind::Response | EnvelopeKind::Push => {
            let items = wire::decode_items(&envelope.payload)?;
            queues.publish_reply(envelope.correlation(), items);
            Ok(())
        }
        EnvelopeKind::Request => Err(WireError::InvalidData("request frame from server")),
    }
}

/// In-process driver answering every frame from a caller-supplied handler.
/// For tests and host-less operation.
pub struct LoopbackDriver {
    handler: Box<dyn Fn(Bytes) -> Result<Option<Bytes>, DriverError> + Send + Sync>,
}

impl LoopbackDriver {
    pub fn new(
        handler: impl Fn(Bytes) -> Result<Option<Bytes>, DriverError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl ChannelDriver for LoopbackDriver {
    async fn transmit(&self, frame: Bytes) -> Result<Option<Bytes>, DriverError> {
        (self.handler)(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::queue_manager::OutcomePolicy;
    use crate::request::{AuthMode, EngineId, Request};
    use crate::response_queue::OutcomeKind;
    use crate::value::WireValue;

    struct PassthroughPolicy;

    impl OutcomePolicy for PassthroughPolicy {
        fn is_session_error(&self, _items: &[WireValue]) -> bool {
            false
        }

        fn is_server_error(&self, _items: &[WireValue]) -> bool {
            false
        }

        fn route_push(&self, _items: &[WireValue]) -> Option<EngineId> {
            Some(EngineId::Presence)
        }
    }

    fn stack() -> (Arc<QueueManager>, SharedAuth, ConnectivityHandle) {
        let manager = Arc::new(QueueManager::new(Arc::new(PassthroughPolicy)));
        let auth = Arc::new(RwLock::new(SessionAuth::app_only("key", "secret")));
        (manager, auth, ConnectivityHandle::new(true))
    }

    async fn wait_for_outcome(
        queues: &QueueManager,
        owner: EngineId,
    ) -> crate::response_queue::Outcome {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(outcome) = queues.claim(owner) {
                return outcome;
            }
            assert!(Instant::now() < deadline, "no outcome arrived");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pump_round_trips_a_request() {
        let (queues, auth, connectivity) = stack();
        let driver = Arc::new(LoopbackDriver::new(|_frame| {
            let reply = wire::encode_value(&WireValue::List(vec![WireValue::Str("ok".into())]));
            Ok(Some(Bytes::from(reply)))
        }));
        let pump = DispatchPump::new(
            Arc::clone(&queues),
            Channel::Http,
            driver,
            auth,
            connectivity,
        );
        pump.start();

        let id = queues.enqueue(
            Request::new("presence/get", EngineId::Presence, AuthMode::Either)
                .with_timeout(Duration::from_secs(60)),
        );
        let outcome = wait_for_outcome(&queues, EngineId::Presence).await;
        assert_eq!(outcome.request_id, Some(id));
        assert_eq!(outcome.kind, OutcomeKind::Normal);
        assert_eq!(outcome.items, vec![WireValue::Str("ok".into())]);
        assert_eq!(queues.outstanding_requests(), 0);
        pump.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn driver_failure_clears_in_flight_requests() {
        let (queues, auth, connectivity) = stack();
        let driver = Arc::new(LoopbackDriver::new(|_frame| {
            Err(DriverError::ConnectionLost("socket reset".into()))
        }));
        let pump = DispatchPump::new(
            Arc::clone(&queues),
            Channel::Http,
            driver,
            auth,
            connectivity.clone(),
        );
        pump.start();

        let id = queues.enqueue(
            Request::new("presence/get", EngineId::Presence, AuthMode::Either)
                .with_timeout(Duration::from_secs(60)),
        );
        let outcome = wait_for_outcome(&queues, EngineId::Presence).await;
        assert_eq!(outcome.request_id, Some(id));
        assert_eq!(outcome.kind, OutcomeKind::TimedOut);
        assert!(!connectivity.is_online());
        pump.stop();
    }

    #[tokio::test]
    async fn stream_frames_demultiplex_by_envelope_kind() {
        let (queues, _auth, _connectivity) = stack();
        let push = wire::encode_value(&WireValue::Str("availability".into()));
        let frame = wire::encode_envelope(EnvelopeKind::Push, 0, &push);
        ingest_stream_frame(&queues, &frame).expect("ingest push");
        let outcome = queues.claim(EngineId::Presence).expect("push outcome");
        assert_eq!(outcome.kind, OutcomeKind::Push);
        assert_eq!(outcome.request_id, None);
    }
}
