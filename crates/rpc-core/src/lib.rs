//! Dual-channel RPC transport core: request queue, response queue, timeout
//! supervision, and the dispatch seam that connects them to real I/O.
//!
//! The queues never understand payload semantics; applications plug in an
//! [`OutcomePolicy`] for classification/routing and consume outcomes by
//! polling [`QueueManager::claim`] for their subsystem.

pub mod channel;
pub mod dispatch;
pub mod queue_manager;
pub mod request;
pub mod request_queue;
pub mod response_queue;
pub mod signing;
pub mod timeout;
pub mod value;
pub mod wire;

pub use channel::{Channel, ConnectivityHandle};
pub use dispatch::{
    ingest_http_reply, ingest_stream_frame, ChannelDriver, DispatchPump, DriverError,
    LoopbackDriver, SharedAuth,
};
pub use queue_manager::{
    OutboundFrame, OutcomePolicy, PublishResult, QueueManager, SessionEvents,
};
pub use request::{AuthMode, EncodeError, EngineId, Request, RequestId};
pub use response_queue::{Outcome, OutcomeKind};
pub use signing::{SessionAuth, SignError};
pub use timeout::TimeoutWatcher;
pub use value::{ParamBag, WireValue};
pub use wire::{Envelope, EnvelopeKind, WireError};
