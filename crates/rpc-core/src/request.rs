use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::channel::Channel;
use crate::signing::{self, SessionAuth, SignError};
use crate::value::{ParamBag, WireValue};
use crate::wire::{self, EnvelopeKind, WireError};

/// Identifier assigned by the request queue; unique and strictly increasing
/// within a process lifetime.
pub type RequestId = u32;

/// Which transport a request is allowed to travel over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Signed with application credentials only; restricted to the HTTP channel.
    AppOnly,
    /// Requires an established session; restricted to the streaming channel.
    SessionRequired,
    /// Eligible for whichever channel drains it first.
    Either,
}

impl AuthMode {
    pub fn eligible_on(self, channel: Channel) -> bool {
        match self {
            AuthMode::AppOnly => channel == Channel::Http,
            AuthMode::SessionRequired => channel == Channel::Stream,
            AuthMode::Either => true,
        }
    }
}

/// The subsystem a request (and its eventual outcome) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineId {
    Presence,
    Contacts,
    Login,
    Identities,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error("request has not been queued")]
    NotQueued,
}

/// One outbound call. Immutable after construction except for the lifecycle
/// fields (id, active channel, expiry), which are only ever touched by the
/// request queue while the queue manager's lock is held.
#[derive(Debug, Clone)]
pub struct Request {
    operation: String,
    params: ParamBag,
    auth_mode: AuthMode,
    owner: EngineId,
    fire_and_forget: bool,
    timeout: Option<Duration>,
    created_at: Instant,
    id: Option<RequestId>,
    active_on: Option<Channel>,
    expires_at: Option<Instant>,
}

impl Request {
    pub fn new(operation: impl Into<String>, owner: EngineId, auth_mode: AuthMode) -> Self {
        Self {
            operation: operation.into(),
            params: ParamBag::new(),
            auth_mode,
            owner,
            fire_and_forget: false,
            timeout: None,
            created_at: Instant::now(),
            id: None,
            active_on: None,
            expires_at: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark this request as fire-and-forget: no response is awaited and the
    /// queue drops it as soon as it has been transmitted.
    pub fn fire_and_forget(mut self) -> Self {
        self.fire_and_forget = true;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<WireValue>) -> Self {
        self.params.insert(key, value);
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn params(&self) -> &ParamBag {
        &self.params
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn owner(&self) -> EngineId {
        self.owner
    }

    pub fn is_fire_and_forget(&self) -> bool {
        self.fire_and_forget
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn id(&self) -> Option<RequestId> {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active_on.is_some()
    }

    pub fn active_channel(&self) -> Option<Channel> {
        self.active_on
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub(crate) fn assign_id(&mut self, id: RequestId) {
        debug_assert!(self.id.is_none(), "request id assigned twice");
        self.id = Some(id);
    }

    pub(crate) fn mark_active(&mut self, channel: Channel) {
        self.active_on = Some(channel);
    }

    pub(crate) fn arm(&mut self, expires_at: Instant) {
        self.expires_at = Some(expires_at);
    }

    /// Produce the wire bytes for this request on the given channel.
    ///
    /// The signature parameter is computed and injected here, immediately
    /// before serialization. Streaming-channel frames get the envelope header
    /// carrying the request id for correlation.
    pub fn encode(
        &self,
        auth: &SessionAuth,
        channel: Channel,
        timestamp: u64,
    ) -> Result<Bytes, EncodeError> {
        let signature = signing::sign(auth, &self.operation, timestamp, &self.params)?;
        let mut auth_entries: Vec<(String, WireValue)> = vec![(
            "key".to_string(),
            WireValue::Str(auth.api_key.clone()),
        )];
        if let Some(session) = &auth.session_id {
            auth_entries.push(("session".to_string(), WireValue::Str(session.clone())));
        }
        auth_entries.push(("ts".to_string(), WireValue::Int(timestamp as i64)));
        auth_entries.push(("sig".to_string(), WireValue::Str(signature)));

        let body = WireValue::Map(vec![
            ("op".to_string(), WireValue::Str(self.operation.clone())),
            ("params".to_string(), self.params.to_value()),
            ("auth".to_string(), WireValue::Map(auth_entries)),
        ]);
        let payload = wire::encode_value(&body);
        match channel {
            Channel::Http => Ok(Bytes::from(payload)),
            Channel::Stream => {
                let id = self.id.ok_or(EncodeError::NotQueued)?;
                Ok(wire::encode_envelope(EnvelopeKind::Request, id, &payload))
            }
        }
    }
}
