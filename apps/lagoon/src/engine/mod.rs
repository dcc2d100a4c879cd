pub mod presence;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rpc_core::{EngineId, QueueManager};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cooperative scheduling surface every engine exposes to the host loop.
pub trait Engine: Send + Sync {
    fn id(&self) -> EngineId;

    /// When the engine next wants to run. `None` means no run is needed
    /// until an outcome or external trigger arrives.
    fn next_run_time(&self) -> Option<Instant>;

    fn run(&self);
}

const IDLE_TICK: Duration = Duration::from_millis(250);

/// Drives registered engines on one task: wakes on outcome notifications,
/// otherwise polls each engine's requested run time.
pub struct EngineManager {
    queues: Arc<QueueManager>,
    engines: Vec<Arc<dyn Engine>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EngineManager {
    pub fn new(queues: Arc<QueueManager>) -> Self {
        Self {
            queues,
            engines: Vec::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        self.engines.push(engine);
    }

    pub fn start(&self) {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return;
        }
        let engines = self.engines.clone();
        let mut outcomes = self.queues.subscribe_outcomes();
        *guard = Some(tokio::spawn(async move {
            loop {
                let now = Instant::now();
                let wait = engines
                    .iter()
                    .filter_map(|engine| engine.next_run_time())
                    .map(|at| at.saturating_duration_since(now))
                    .min()
                    .unwrap_or(IDLE_TICK)
                    .min(IDLE_TICK);
                tokio::select! {
                    received = outcomes.recv() => match received {
                        Ok(owner) => {
                            for engine in &engines {
                                if engine.id() == owner {
                                    engine.run();
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(target: "lagoon::engine", skipped, "outcome notifications lagged; running all engines");
                            for engine in &engines {
                                engine.run();
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tokio::time::sleep(wait) => {
                        let due = Instant::now();
                        for engine in &engines {
                            if engine.next_run_time().is_some_and(|at| at <= due) {
                                engine.run();
                            }
                        }
                    }
                }
            }
            debug!(target: "lagoon::engine", "engine manager stopped");
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}
