use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// The two physical transports a request can travel over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Discrete request/response calls, usable before a session exists.
    Http,
    /// The persistent session-authenticated streaming connection.
    Stream,
}

/// Shared online/offline state for the transport as a whole.
///
/// Dispatch pumps flip this when a driver fails; engines read it to decide
/// whether an optimistic local write makes sense and to detect connection
/// drops that pre-empt batch processing. Each online-to-offline transition
/// bumps `offline_epoch`, so an engine that was not running at the moment
/// of the drop still observes that it happened.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    tx: Arc<watch::Sender<bool>>,
    offline_epoch: Arc<AtomicU64>,
}

impl ConnectivityHandle {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self {
            tx: Arc::new(tx),
            offline_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_online(&self) {
        self.tx.send_if_modified(|online| {
            let flipped = !*online;
            *online = true;
            flipped
        });
    }

    pub fn set_offline(&self) {
        let flipped = self.tx.send_if_modified(|online| {
            let flipped = *online;
            *online = false;
            flipped
        });
        if flipped {
            self.offline_epoch.fetch_add(1, Ordering::Release);
        }
    }

    /// Number of online-to-offline transitions so far.
    pub fn offline_epoch(&self) -> u64 {
        self.offline_epoch.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityHandle {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connectivity_transitions_are_observed() {
        let handle = ConnectivityHandle::new(false);
        let mut rx = handle.subscribe();
        assert!(!handle.is_online());
        handle.set_online();
        rx.changed().await.expect("watch open");
        assert!(*rx.borrow());
        handle.set_offline();
        rx.changed().await.expect("watch open");
        assert!(!handle.is_online());
    }

    #[test]
    fn only_real_drops_bump_the_offline_epoch() {
        let handle = ConnectivityHandle::new(false);
        assert_eq!(handle.offline_epoch(), 0);
        handle.set_offline();
        assert_eq!(handle.offline_epoch(), 0, "already offline");
        handle.set_online();
        handle.set_online();
        handle.set_offline();
        assert_eq!(handle.offline_epoch(), 1);
        handle.set_offline();
        assert_eq!(handle.offline_epoch(), 1);
    }
}
