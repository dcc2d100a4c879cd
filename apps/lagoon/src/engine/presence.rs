use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rpc_core::{
    AuthMode, ConnectivityHandle, EngineId, Outcome, OutcomeKind, QueueManager, Request,
    RequestId, WireValue,
};
use tracing::{debug, trace, warn};

use crate::engine::Engine;
use crate::model::chat::{ChatMessage, ConversationId, TimelineEntry};
use crate::model::presence::{NetworkId, NetworkPresence, OnlineStatus, User};
use crate::model::ContactId;
use crate::protocol::payload::{self, NoticeKind, PayloadItem, SystemNotice};
use crate::store::LocalStore;

pub mod ops {
    pub const GET_PRESENCE_LIST: &str = "presence/getpresencelist";
    pub const SET_AVAILABILITY: &str = "presence/setavailability";
    pub const SEND_CHAT_MESSAGE: &str = "chat/sendchatmessage";
    pub const START_CONVERSATION: &str = "chat/startconversation";
}

/// Users reconciled into the store per engine invocation.
const PAGE_SIZE: usize = 10;
/// UI notifications are batched to every Nth page while a batch drains.
const NOTIFY_PAGE_INTERVAL: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("contact {contact} has no identity on network {network:?}")]
    UnknownRecipient {
        contact: ContactId,
        network: NetworkId,
    },
}

/// UI-facing change notifications. Implementations must not call back into
/// the engine.
pub trait UpdateSink: Send + Sync {
    fn presence_changed(&self, contacts: &[ContactId]);
    fn all_presence_changed(&self);
    fn chat_message_received(&self, contact: ContactId);
    fn message_send_failed(&self, contact: ContactId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    BatchProcessing,
}

struct BufferedMessage {
    body: String,
    network: NetworkId,
}

struct EngineState {
    phase: Phase,
    pending: VecDeque<User>,
    pages_since_notify: u32,
    page_contacts: Vec<ContactId>,
    buffered: HashMap<ContactId, BufferedMessage>,
    awaiting_conversation: HashMap<RequestId, ContactId>,
    next_run: Option<Instant>,
    offline_epoch: u64,
}

/// Keeps local presence state synchronized with the server and mediates
/// chat message send/receive over the shared transport.
///
/// Incoming presence batches are applied in pages with a zero-delay re-run
/// between pages; an offline transition pre-empts whatever batch is in
/// flight and resets every known contact except the local profile.
pub struct PresenceEngine {
    queues: Arc<QueueManager>,
    store: Arc<dyn LocalStore>,
    connectivity: ConnectivityHandle,
    sink: Arc<dyn UpdateSink>,
    request_timeout: Duration,
    state: Mutex<EngineState>,
}

impl PresenceEngine {
    pub fn new(
        queues: Arc<QueueManager>,
        store: Arc<dyn LocalStore>,
        connectivity: ConnectivityHandle,
        sink: Arc<dyn UpdateSink>,
        request_timeout: Duration,
    ) -> Self {
        let offline_epoch = connectivity.offline_epoch();
        Self {
            queues,
            store,
            connectivity,
            sink,
            request_timeout,
            state: Mutex::new(EngineState {
                phase: Phase::Idle,
                pending: VecDeque::new(),
                pages_since_notify: 0,
                page_contacts: Vec::new(),
                buffered: HashMap::new(),
                awaiting_conversation: HashMap::new(),
                next_run: None,
                offline_epoch,
            }),
        }
    }

    /// Ask the server for the full presence list. Safe to call repeatedly;
    /// duplicates simply queue again.
    pub fn get_presence_list(&self) {
        let request = Request::new(
            ops::GET_PRESENCE_LIST,
            EngineId::Presence,
            AuthMode::SessionRequired,
        )
        .with_timeout(self.request_timeout);
        let id = self.queues.enqueue(request);
        trace!(target: "lagoon::presence", request_id = id, "presence list requested");
    }

    /// Set the local user's availability on every network at once.
    ///
    /// The store is written first so local state reflects intent
    /// immediately; while offline the whole call is a no-op so an
    /// unrealizable intent never pollutes local state.
    pub fn set_my_availability(&self, status: OnlineStatus) {
        let Some(mut user) = self.my_presence_record() else {
            return;
        };
        user.set_all(status);
        self.push_availability(user);
    }

    /// Set the local user's availability on a single network.
    pub fn set_network_availability(&self, presence: NetworkPresence) {
        let Some(mut user) = self.my_presence_record() else {
            return;
        };
        user.set_status(presence.network, presence.status);
        self.push_availability(user);
    }

    fn my_presence_record(&self) -> Option<User> {
        if !self.connectivity.is_online() {
            debug!(target: "lagoon::presence", "offline; availability change skipped");
            return None;
        }
        let Some(me) = self.store.me_profile() else {
            debug!(target: "lagoon::presence", "no me profile; availability change skipped");
            return None;
        };
        let mut user = self
            .store
            .get_presence(me.contact)
            .unwrap_or_else(|| User::new(&me.user_id));
        user.set_contact_id(me.contact);
        Some(user)
    }

    fn push_availability(&self, user: User) {
        if let Err(err) = self.store.set_presence(&user) {
            warn!(target: "lagoon::presence", error = %err, "optimistic availability write failed");
        }
        let availability: Vec<(String, WireValue)> = user
            .presences()
            .iter()
            .map(|presence| {
                (
                    presence.network.as_str().to_string(),
                    WireValue::Int(presence.status.ordinal() as i64),
                )
            })
            .collect();
        let request = Request::new(
            ops::SET_AVAILABILITY,
            EngineId::Presence,
            AuthMode::SessionRequired,
        )
        .with_timeout(self.request_timeout)
        .param("availability", availability);
        self.queues.enqueue(request);
    }

    /// Send a chat message to a contact on the given network.
    ///
    /// With an existing conversation the message goes out fire-and-forget.
    /// Otherwise a conversation is requested first and the message is
    /// buffered until the created ack (or a failure) resolves it.
    pub fn send_message(
        &self,
        contact: ContactId,
        body: &str,
        network: NetworkId,
    ) -> Result<(), EngineError> {
        if let Some(conversation) = self.store.find_conversation(contact, network) {
            self.send_to_conversation(&conversation, contact, body, network);
            return Ok(());
        }
        let Some(recipient) = self.store.user_for_contact(contact, network) else {
            return Err(EngineError::UnknownRecipient { contact, network });
        };
        let request = Request::new(
            ops::START_CONVERSATION,
            EngineId::Presence,
            AuthMode::SessionRequired,
        )
        .with_timeout(self.request_timeout)
        .param("recipient", recipient)
        .param("network", network.as_str());
        // Silent enqueue: the buffer bookkeeping must be in place before a
        // pump can possibly transmit and resolve this request.
        let id = self.queues.enqueue_silent(request);
        {
            let mut state = self.state.lock();
            state.buffered.insert(
                contact,
                BufferedMessage {
                    body: body.to_string(),
                    network,
                },
            );
            state.awaiting_conversation.insert(id, contact);
        }
        self.queues.notify_pending();
        debug!(target: "lagoon::presence", contact, request_id = id, "conversation requested; message buffered");
        Ok(())
    }

    fn send_to_conversation(
        &self,
        conversation: &ConversationId,
        contact: ContactId,
        body: &str,
        network: NetworkId,
    ) {
        let request = Request::new(
            ops::SEND_CHAT_MESSAGE,
            EngineId::Presence,
            AuthMode::SessionRequired,
        )
        .fire_and_forget()
        .param("conversation", conversation.as_str())
        .param("network", network.as_str())
        .param("body", body);
        self.queues.enqueue(request);
        let entry = TimelineEntry::outgoing(contact, network, body);
        if let Err(err) = self.store.add_timeline_entry(&entry) {
            warn!(target: "lagoon::presence", contact, error = %err, "timeline append failed");
        }
    }

    /// Discard pending work and mark every known contact offline except the
    /// local profile. Always wins over in-progress batch processing.
    pub fn reset_to_offline(&self) {
        {
            let mut state = self.state.lock();
            let dropped = state.pending.len();
            if dropped > 0 {
                debug!(target: "lagoon::presence", dropped, "offline reset discards pending batch");
            }
            state.pending.clear();
            state.phase = Phase::Idle;
            state.next_run = None;
            state.pages_since_notify = 0;
            state.page_contacts.clear();
        }
        let result = match self.store.me_profile() {
            Some(me) => self.store.set_all_offline_except(me.contact),
            None => self.store.set_all_offline(),
        };
        if let Err(err) = result {
            warn!(target: "lagoon::presence", error = %err, "offline reset write failed");
        }
        self.sink.all_presence_changed();
    }

    /// Number of users still waiting to be reconciled.
    pub fn pending_batch_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn service(&self) {
        let epoch = self.connectivity.offline_epoch();
        let dropped_connection = {
            let mut state = self.state.lock();
            let dropped = state.offline_epoch != epoch;
            state.offline_epoch = epoch;
            dropped
        };
        if dropped_connection {
            self.reset_to_offline();
        }
        while let Some(outcome) = self.queues.claim(EngineId::Presence) {
            self.handle_server_response(outcome);
        }
        self.process_pending_page();
    }

    fn handle_server_response(&self, outcome: Outcome) {
        if matches!(outcome.kind, OutcomeKind::TimedOut | OutcomeKind::ServerError) {
            if let Some(id) = outcome.request_id {
                let failed = self.state.lock().awaiting_conversation.remove(&id);
                if let Some(contact) = failed {
                    debug!(target: "lagoon::presence", contact, request_id = id, "conversation setup failed");
                    self.fail_pending_send(contact);
                }
            }
            if outcome.kind == OutcomeKind::TimedOut {
                // Indistinguishable from a server error for UI purposes; the
                // next natural trigger re-issues, never the transport.
                debug!(target: "lagoon::presence", request_id = ?outcome.request_id, "request timed out");
                return;
            }
        }
        for item in payload::decode_items(&outcome.items) {
            match item {
                PayloadItem::PresenceList(users) => self.begin_batch("presence list", users),
                PayloadItem::AvailabilityPush(users) => {
                    self.begin_batch("availability push", users)
                }
                PayloadItem::ChatMessage(message) => self.receive_chat_message(message),
                PayloadItem::ConversationCreated {
                    conversation,
                    recipient,
                } => self.conversation_created(outcome.request_id, conversation, recipient),
                PayloadItem::ConversationClosed { conversation } => {
                    if let Err(err) = self.store.remove_conversation(&conversation) {
                        warn!(target: "lagoon::presence", error = %err, "failed to drop closed conversation");
                    }
                }
                PayloadItem::SystemNotice(notice) => self.system_notice(notice),
                PayloadItem::ServerError(error) => {
                    // Session invalidation never reaches this point; it is
                    // short-circuited at the response queue boundary.
                    warn!(
                        target: "lagoon::presence",
                        code = %error.code,
                        message = %error.message,
                        "server reported error"
                    );
                }
            }
        }
    }

    fn begin_batch(&self, origin: &str, users: Vec<User>) {
        if users.is_empty() {
            debug!(target: "lagoon::presence", origin, "ignoring empty presence batch");
            return;
        }
        let mut state = self.state.lock();
        debug!(target: "lagoon::presence", origin, count = users.len(), "presence batch queued");
        state.pending.extend(users);
        state.phase = Phase::BatchProcessing;
        state.next_run = Some(Instant::now());
    }

    fn process_pending_page(&self) {
        let me = self.store.me_profile();
        let mut notify: Option<Vec<ContactId>> = None;
        {
            let mut state = self.state.lock();
            if state.phase != Phase::BatchProcessing {
                return;
            }
            for _ in 0..PAGE_SIZE {
                let Some(mut user) = state.pending.pop_front() else {
                    break;
                };
                let Some(contact) = self.store.contact_for_user(user.user_id()) else {
                    debug!(target: "lagoon::presence", user = user.user_id(), "presence for unknown user skipped");
                    continue;
                };
                user.set_contact_id(contact);
                if me.as_ref().is_some_and(|profile| profile.contact == contact) {
                    // Own profile never shows a PC presence row.
                    user.remove_network(NetworkId::Pc);
                    user.recompute_aggregate();
                }
                if let Err(err) = self.store.set_presence(&user) {
                    warn!(target: "lagoon::presence", contact, error = %err, "presence write failed; continuing batch");
                    continue;
                }
                state.page_contacts.push(contact);
            }
            state.pages_since_notify += 1;
            if state.pending.is_empty() {
                state.phase = Phase::Idle;
                state.next_run = None;
                state.pages_since_notify = 0;
                notify = Some(std::mem::take(&mut state.page_contacts));
            } else {
                state.next_run = Some(Instant::now());
                if state.pages_since_notify >= NOTIFY_PAGE_INTERVAL {
                    state.pages_since_notify = 0;
                    notify = Some(std::mem::take(&mut state.page_contacts));
                }
            }
        }
        if let Some(contacts) = notify {
            trace!(target: "lagoon::presence", count = contacts.len(), "notifying presence changes");
            self.sink.presence_changed(&contacts);
        }
    }

    fn receive_chat_message(&self, message: ChatMessage) {
        let Some(contact) = self.store.contact_for_user(&message.from) else {
            debug!(target: "lagoon::presence", from = %message.from, "chat message from unknown sender dropped");
            return;
        };
        if self
            .store
            .find_conversation(contact, message.network)
            .as_ref()
            != Some(&message.conversation)
        {
            if let Err(err) =
                self.store
                    .set_conversation(contact, message.network, message.conversation.clone())
            {
                warn!(target: "lagoon::presence", contact, error = %err, "conversation mapping write failed");
            }
        }
        let entry = TimelineEntry::incoming(contact, message.network, message.body.clone());
        if let Err(err) = self.store.add_timeline_entry(&entry) {
            warn!(target: "lagoon::presence", contact, error = %err, "timeline append failed");
        }
        self.sink.chat_message_received(contact);
    }

    fn conversation_created(
        &self,
        request_id: Option<RequestId>,
        conversation: ConversationId,
        recipient: String,
    ) {
        let (contact, buffered) = {
            let mut state = self.state.lock();
            let contact = request_id
                .and_then(|id| state.awaiting_conversation.remove(&id))
                .or_else(|| self.store.contact_for_user(&recipient));
            match contact {
                Some(contact) => (contact, state.buffered.remove(&contact)),
                None => {
                    debug!(target: "lagoon::presence", recipient = %recipient, "conversation ack for unknown recipient");
                    return;
                }
            }
        };
        match buffered {
            Some(message) => {
                if let Err(err) =
                    self.store
                        .set_conversation(contact, message.network, conversation.clone())
                {
                    warn!(target: "lagoon::presence", contact, error = %err, "conversation mapping write failed");
                }
                self.send_to_conversation(&conversation, contact, &message.body, message.network);
            }
            None => {
                debug!(target: "lagoon::presence", contact, "conversation created with no pending message");
            }
        }
        // A fresh conversation supersedes whatever was cached for others.
        if let Err(err) = self.store.remove_conversations_except(contact) {
            warn!(target: "lagoon::presence", error = %err, "conversation prune failed");
        }
    }

    fn system_notice(&self, notice: SystemNotice) {
        match notice.kind {
            NoticeKind::MessageSendFailed => {
                let contact = notice
                    .user_id
                    .as_deref()
                    .and_then(|user| self.store.contact_for_user(user));
                match contact {
                    Some(contact) => self.fail_pending_send(contact),
                    None => {
                        debug!(target: "lagoon::presence", "send-failure notice without resolvable recipient")
                    }
                }
            }
            NoticeKind::ConversationExpired => {
                if let Some(conversation) = notice.conversation {
                    debug!(target: "lagoon::presence", conversation = %conversation, "conversation expired");
                    if let Err(err) = self.store.remove_conversation(&conversation) {
                        warn!(target: "lagoon::presence", error = %err, "failed to drop expired conversation");
                    }
                }
            }
        }
    }

    fn fail_pending_send(&self, contact: ContactId) {
        let dropped = self.state.lock().buffered.remove(&contact);
        if dropped.is_some() {
            debug!(target: "lagoon::presence", contact, "discarding undeliverable buffered message");
        }
        self.sink.message_send_failed(contact);
    }
}

impl Engine for PresenceEngine {
    fn id(&self) -> EngineId {
        EngineId::Presence
    }

    fn next_run_time(&self) -> Option<Instant> {
        if self.queues.has_outcome(EngineId::Presence) {
            return Some(Instant::now());
        }
        let state = self.state.lock();
        if state.offline_epoch != self.connectivity.offline_epoch() {
            return Some(Instant::now());
        }
        state.next_run
    }

    fn run(&self) {
        self.service();
    }
}
