use std::sync::Arc;

use parking_lot::RwLock;
use rpc_core::{
    Channel, ChannelDriver, ConnectivityHandle, DispatchPump, QueueManager, SharedAuth,
};

use crate::config::ClientConfig;
use crate::engine::presence::{PresenceEngine, UpdateSink};
use crate::engine::EngineManager;
use crate::protocol::LagoonPolicy;
use crate::session::SessionSupervisor;
use crate::store::LocalStore;

/// The assembled client core: queues, pumps, session supervision, and
/// engines, built once at process start and shared by reference.
pub struct LagoonClient {
    queues: Arc<QueueManager>,
    connectivity: ConnectivityHandle,
    session: Arc<SessionSupervisor>,
    presence: Arc<PresenceEngine>,
    engines: EngineManager,
    http_pump: DispatchPump,
    stream_pump: DispatchPump,
}

impl LagoonClient {
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn LocalStore>,
        sink: Arc<dyn UpdateSink>,
        http_driver: Arc<dyn ChannelDriver>,
        stream_driver: Arc<dyn ChannelDriver>,
    ) -> Self {
        let queues = Arc::new(QueueManager::new(Arc::new(LagoonPolicy)));
        let auth: SharedAuth = Arc::new(RwLock::new(config.session_auth()));
        let connectivity = ConnectivityHandle::new(false);

        let session = Arc::new(SessionSupervisor::new(
            Arc::clone(&auth),
            Arc::clone(&queues),
            connectivity.clone(),
        ));
        let session_events: Arc<dyn rpc_core::SessionEvents> = session.clone();
        queues.set_session_events(session_events);

        let presence = Arc::new(PresenceEngine::new(
            Arc::clone(&queues),
            Arc::clone(&store),
            connectivity.clone(),
            sink,
            config.request_timeout,
        ));
        let mut engines = EngineManager::new(Arc::clone(&queues));
        let presence_engine: Arc<dyn crate::engine::Engine> = presence.clone();
        engines.register(presence_engine);

        let http_pump = DispatchPump::new(
            Arc::clone(&queues),
            Channel::Http,
            http_driver,
            Arc::clone(&auth),
            connectivity.clone(),
        );
        let stream_pump = DispatchPump::new(
            Arc::clone(&queues),
            Channel::Stream,
            stream_driver,
            Arc::clone(&auth),
            connectivity.clone(),
        );

        Self {
            queues,
            connectivity,
            session,
            presence,
            engines,
            http_pump,
            stream_pump,
        }
    }

    /// Start the timeout supervisor, both dispatch pumps, and the engine
    /// loop. Must run inside a tokio runtime.
    pub fn start(&self) {
        self.queues.start();
        self.http_pump.start();
        self.stream_pump.start();
        self.engines.start();
    }

    pub fn shutdown(&self) {
        self.engines.stop();
        self.http_pump.stop();
        self.stream_pump.stop();
        self.queues.shutdown();
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    pub fn connectivity(&self) -> &ConnectivityHandle {
        &self.connectivity
    }

    pub fn session(&self) -> &Arc<SessionSupervisor> {
        &self.session
    }

    pub fn presence(&self) -> &Arc<PresenceEngine> {
        &self.presence
    }
}
