use std::sync::Arc;

use rpc_core::{ConnectivityHandle, QueueManager, SessionEvents, SharedAuth};
use tracing::{info, warn};

/// Reacts to session lifecycle events that affect the whole transport.
///
/// A server-reported invalid session escalates past the per-request channel:
/// credentials are purged, the transport goes offline, and every outstanding
/// request resolves as timed out so no subsystem waits forever.
pub struct SessionSupervisor {
    auth: SharedAuth,
    queues: Arc<QueueManager>,
    connectivity: ConnectivityHandle,
}

impl SessionSupervisor {
    pub fn new(
        auth: SharedAuth,
        queues: Arc<QueueManager>,
        connectivity: ConnectivityHandle,
    ) -> Self {
        Self {
            auth,
            queues,
            connectivity,
        }
    }

    /// Attach a freshly established session and bring the transport online.
    pub fn establish(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        info!(target: "lagoon::session", "session established");
        self.auth.write().session_id = Some(session_id);
        self.connectivity.set_online();
        self.queues.notify_pending();
    }

    /// Tear the session down, clearing every outstanding request.
    pub fn force_logout(&self) {
        self.auth.write().clear_session();
        self.connectivity.set_offline();
        self.queues.clear_all();
    }
}

impl SessionEvents for SessionSupervisor {
    fn on_session_invalid(&self) {
        warn!(target: "lagoon::session", "session invalidated by server; logging out");
        self.force_logout();
    }
}
