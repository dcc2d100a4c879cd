use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rpc_core::{ConnectivityHandle, QueueManager, SessionAuth, WireValue};

use crate::engine::presence::{PresenceEngine, UpdateSink};
use crate::engine::Engine;
use crate::model::ContactId;
use crate::protocol::payload::{
    ITEM_CHAT_MESSAGE, ITEM_CONVERSATION_CLOSED, ITEM_CONVERSATION_CREATED, ITEM_ERROR,
    ITEM_PRESENCE_LIST, ITEM_SYSTEM_NOTICE,
};
use crate::protocol::LagoonPolicy;
use crate::store::MemoryStore;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    PresenceChanged(Vec<ContactId>),
    AllPresenceChanged,
    ChatMessageReceived(ContactId),
    MessageSendFailed(ContactId),
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    pub fn presence_notifications(&self) -> Vec<Vec<ContactId>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::PresenceChanged(contacts) => Some(contacts),
                _ => None,
            })
            .collect()
    }
}

impl UpdateSink for RecordingSink {
    fn presence_changed(&self, contacts: &[ContactId]) {
        self.events
            .lock()
            .push(SinkEvent::PresenceChanged(contacts.to_vec()));
    }

    fn all_presence_changed(&self) {
        self.events.lock().push(SinkEvent::AllPresenceChanged);
    }

    fn chat_message_received(&self, contact: ContactId) {
        self.events
            .lock()
            .push(SinkEvent::ChatMessageReceived(contact));
    }

    fn message_send_failed(&self, contact: ContactId) {
        self.events
            .lock()
            .push(SinkEvent::MessageSendFailed(contact));
    }
}

pub struct TestStack {
    pub queues: Arc<QueueManager>,
    pub store: Arc<MemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub connectivity: ConnectivityHandle,
    pub engine: Arc<PresenceEngine>,
}

pub fn stack(online: bool) -> TestStack {
    let queues = Arc::new(QueueManager::new(Arc::new(LagoonPolicy)));
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let connectivity = ConnectivityHandle::new(online);
    let engine = Arc::new(PresenceEngine::new(
        Arc::clone(&queues),
        Arc::clone(&store) as Arc<dyn crate::store::LocalStore>,
        connectivity.clone(),
        Arc::clone(&sink) as Arc<dyn UpdateSink>,
        Duration::from_secs(60),
    ));
    TestStack {
        queues,
        store,
        sink,
        connectivity,
        engine,
    }
}

pub fn session_auth() -> SessionAuth {
    SessionAuth::app_only("test-key", "test-secret").with_session("test-session")
}

pub fn map(entries: Vec<(&str, WireValue)>) -> WireValue {
    WireValue::Map(
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

pub fn user_entry(user_id: &str, statuses: &[(&str, i64)]) -> WireValue {
    map(vec![
        ("user", WireValue::Str(user_id.into())),
        (
            "presence",
            WireValue::Map(
                statuses
                    .iter()
                    .map(|(network, ordinal)| (network.to_string(), WireValue::Int(*ordinal)))
                    .collect(),
            ),
        ),
    ])
}

pub fn presence_list_item(users: Vec<WireValue>) -> WireValue {
    map(vec![
        ("type", WireValue::Str(ITEM_PRESENCE_LIST.into())),
        ("users", WireValue::List(users)),
    ])
}

pub fn chat_message_item(conversation: &str, from: &str, network: &str, body: &str) -> WireValue {
    map(vec![
        ("type", WireValue::Str(ITEM_CHAT_MESSAGE.into())),
        ("conversation", WireValue::Str(conversation.into())),
        ("from", WireValue::Str(from.into())),
        ("network", WireValue::Str(network.into())),
        ("body", WireValue::Str(body.into())),
    ])
}

pub fn conversation_created_item(conversation: &str, recipient: &str) -> WireValue {
    map(vec![
        ("type", WireValue::Str(ITEM_CONVERSATION_CREATED.into())),
        ("conversation", WireValue::Str(conversation.into())),
        ("recipient", WireValue::Str(recipient.into())),
    ])
}

pub fn conversation_closed_item(conversation: &str) -> WireValue {
    map(vec![
        ("type", WireValue::Str(ITEM_CONVERSATION_CLOSED.into())),
        ("conversation", WireValue::Str(conversation.into())),
    ])
}

pub fn system_notice_item(code: &str, conversation: Option<&str>, user: Option<&str>) -> WireValue {
    let mut entries = vec![
        ("type", WireValue::Str(ITEM_SYSTEM_NOTICE.into())),
        ("code", WireValue::Str(code.into())),
    ];
    if let Some(conversation) = conversation {
        entries.push(("conversation", WireValue::Str(conversation.into())));
    }
    if let Some(user) = user {
        entries.push(("user", WireValue::Str(user.into())));
    }
    map(entries)
}

pub fn error_item(code: &str, message: &str) -> WireValue {
    map(vec![
        ("type", WireValue::Str(ITEM_ERROR.into())),
        ("code", WireValue::Str(code.into())),
        ("message", WireValue::Str(message.into())),
    ])
}

/// Run the engine until it stops asking for a zero-delay re-invocation.
/// Returns how many invocations it took.
pub fn drive_to_idle(stack: &TestStack) -> usize {
    let mut runs = 0;
    loop {
        stack.engine.run();
        runs += 1;
        assert!(runs < 1000, "engine never settled");
        if stack.engine.next_run_time().is_none() {
            return runs;
        }
    }
}
