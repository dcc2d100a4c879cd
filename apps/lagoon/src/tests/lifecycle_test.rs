use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use rpc_core::{wire, DriverError, EnvelopeKind, LoopbackDriver, WireValue};

use crate::client::LagoonClient;
use crate::config::ClientConfig;
use crate::engine::presence::UpdateSink;
use crate::model::presence::{NetworkId, OnlineStatus, User};
use crate::store::{LocalStore, MemoryStore};
use crate::tests::support::{
    error_item, presence_list_item, user_entry, RecordingSink, SinkEvent,
};

fn client(
    config: ClientConfig,
    store: &Arc<MemoryStore>,
    sink: &Arc<RecordingSink>,
    stream: Arc<LoopbackDriver>,
) -> LagoonClient {
    let http = Arc::new(LoopbackDriver::new(|_frame| Ok(None)));
    LagoonClient::new(
        config,
        Arc::clone(store) as Arc<dyn LocalStore>,
        Arc::clone(sink) as Arc<dyn UpdateSink>,
        http,
        stream,
    )
}

async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn presence_list_round_trips_end_to_end() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    for contact in 1..=12 {
        store.insert_contact(contact, NetworkId::Mobile, &format!("u-{contact}"));
    }
    let sink = Arc::new(RecordingSink::default());
    let stream = Arc::new(LoopbackDriver::new(|frame| {
        let envelope =
            wire::decode_envelope(&frame).map_err(|err| DriverError::Protocol(err.to_string()))?;
        let users: Vec<WireValue> = (1..=12)
            .map(|n| user_entry(&format!("u-{n}"), &[("mobile", 3)]))
            .collect();
        let payload = wire::encode_value(&WireValue::List(vec![presence_list_item(users)]));
        Ok(Some(wire::encode_envelope(
            EnvelopeKind::Response,
            envelope.correlation_id,
            &payload,
        )))
    }));
    let client = client(ClientConfig::default(), &store, &sink, stream);
    client.start();
    client.session().establish("sess-1");
    client.presence().get_presence_list();

    wait_for("presence reconciliation", || store.presence_count() == 12).await;
    wait_for("request resolution", || {
        client.queues().outstanding_requests() == 0 && client.queues().queued_outcomes() == 0
    })
    .await;
    assert_eq!(
        store.get_presence(3).map(|user| user.aggregate()),
        Some(OnlineStatus::Online)
    );
    assert!(!sink.presence_notifications().is_empty());
    client.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn losing_the_connection_resets_presence_to_offline() {
    let store = Arc::new(MemoryStore::new());
    store.set_me(99, "me-user");
    let mut me = User::from_statuses("me-user", &[(NetworkId::Mobile, OnlineStatus::Online)]);
    me.set_contact_id(99);
    store.set_presence(&me).expect("seed me");
    for contact in 1..=3 {
        let user_id = format!("u-{contact}");
        store.insert_contact(contact, NetworkId::Mobile, &user_id);
        let mut user =
            User::from_statuses(user_id.as_str(), &[(NetworkId::Mobile, OnlineStatus::Online)]);
        user.set_contact_id(contact);
        store.set_presence(&user).expect("seed contact");
    }
    let sink = Arc::new(RecordingSink::default());
    let stream = Arc::new(LoopbackDriver::new(|_frame| {
        Err(DriverError::ConnectionLost("stream reset".into()))
    }));
    let client = client(ClientConfig::default(), &store, &sink, stream);
    client.start();
    client.session().establish("sess-1");
    client.presence().get_presence_list();

    wait_for("offline reset", || {
        sink.events().contains(&SinkEvent::AllPresenceChanged)
    })
    .await;
    assert!(!client.connectivity().is_online());
    for contact in 1..=3 {
        assert_eq!(
            store.get_presence(contact).map(|user| user.aggregate()),
            Some(OnlineStatus::Offline),
            "contact {contact} must be reset"
        );
    }
    assert_eq!(
        store.get_presence(99).map(|user| user.aggregate()),
        Some(OnlineStatus::Online),
        "me profile survives the reset"
    );
    client.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_session_error_forces_logout_and_resolves_every_request() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let stream = Arc::new(LoopbackDriver::new(|frame| {
        let envelope =
            wire::decode_envelope(&frame).map_err(|err| DriverError::Protocol(err.to_string()))?;
        let payload = wire::encode_value(&WireValue::List(vec![error_item(
            "SESSION_INVALID",
            "session expired upstream",
        )]));
        Ok(Some(wire::encode_envelope(
            EnvelopeKind::Response,
            envelope.correlation_id,
            &payload,
        )))
    }));
    let client = client(ClientConfig::default(), &store, &sink, stream);
    client.start();
    client.session().establish("sess-1");
    client.presence().get_presence_list();
    client.presence().get_presence_list();

    wait_for("forced logout", || !client.connectivity().is_online()).await;
    wait_for("request resolution", || {
        client.queues().outstanding_requests() == 0 && client.queues().queued_outcomes() == 0
    })
    .await;
    assert_eq!(store.presence_count(), 0, "no payload reached the engine");
    client.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unanswered_requests_surface_as_timeouts() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let stream = Arc::new(LoopbackDriver::new(|_frame| Ok(None)));
    let config = ClientConfig {
        request_timeout: Duration::from_millis(80),
        ..ClientConfig::default()
    };
    let client = client(config, &store, &sink, stream);
    client.start();
    client.session().establish("sess-1");
    client.presence().get_presence_list();

    wait_for("timeout synthesis", || {
        client.queues().outstanding_requests() == 0
    })
    .await;
    wait_for("timeout consumption", || {
        client.queues().queued_outcomes() == 0
    })
    .await;
    assert!(sink.events().is_empty(), "a timeout never reaches the UI");
    client.shutdown();
}
