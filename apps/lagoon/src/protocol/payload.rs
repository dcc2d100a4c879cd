use rpc_core::{EngineId, OutcomePolicy, WireValue};
use tracing::debug;

use crate::model::chat::{ChatMessage, ConversationId};
use crate::model::presence::{NetworkId, OnlineStatus, User};

pub const ITEM_PRESENCE_LIST: &str = "presence.list";
pub const ITEM_PRESENCE_PUSH: &str = "presence.push";
pub const ITEM_CHAT_MESSAGE: &str = "chat.message";
pub const ITEM_CONVERSATION_CREATED: &str = "chat.conversation";
pub const ITEM_CONVERSATION_CLOSED: &str = "chat.closed";
pub const ITEM_SYSTEM_NOTICE: &str = "sys.notice";
pub const ITEM_ERROR: &str = "error";

const CODE_SESSION_INVALID: &str = "SESSION_INVALID";
const CODE_SESSION_EXPIRED: &str = "SESSION_EXPIRED";
const CODE_MESSAGE_SEND_FAILED: &str = "MESSAGE_SEND_FAILED";
const CODE_CONVERSATION_EXPIRED: &str = "CONVERSATION_EXPIRED";

/// Everything a decoded payload item can be. Demultiplexing in the engines
/// matches on this exhaustively; there is no open-ended type code.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadItem {
    PresenceList(Vec<User>),
    AvailabilityPush(Vec<User>),
    ChatMessage(ChatMessage),
    ConversationCreated {
        conversation: ConversationId,
        recipient: String,
    },
    ConversationClosed {
        conversation: ConversationId,
    },
    SystemNotice(SystemNotice),
    ServerError(ServerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: String,
    pub message: String,
}

impl ServerError {
    pub fn is_session_error(&self) -> bool {
        matches!(
            self.code.as_str(),
            CODE_SESSION_INVALID | CODE_SESSION_EXPIRED
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    MessageSendFailed,
    ConversationExpired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemNotice {
    pub kind: NoticeKind,
    pub conversation: Option<ConversationId>,
    pub user_id: Option<String>,
}

/// Decode raw outcome items into typed payload items.
///
/// Malformed entries are logged and skipped so one bad record never aborts
/// the rest of a batch.
pub fn decode_items(items: &[WireValue]) -> Vec<PayloadItem> {
    let mut decoded = Vec::with_capacity(items.len());
    for item in items {
        match decode_item(item) {
            Some(payload) => decoded.push(payload),
            None => {
                debug!(target: "lagoon::protocol", "skipping malformed payload item");
            }
        }
    }
    decoded
}

fn decode_item(item: &WireValue) -> Option<PayloadItem> {
    match item_type(item)? {
        ITEM_PRESENCE_LIST => Some(PayloadItem::PresenceList(decode_users(item))),
        ITEM_PRESENCE_PUSH => Some(PayloadItem::AvailabilityPush(decode_users(item))),
        ITEM_CHAT_MESSAGE => {
            let network = NetworkId::from_name(field_str(item, "network")?)?;
            Some(PayloadItem::ChatMessage(ChatMessage {
                conversation: field_str(item, "conversation")?.to_string(),
                from: field_str(item, "from")?.to_string(),
                network,
                body: field_str(item, "body")?.to_string(),
            }))
        }
        ITEM_CONVERSATION_CREATED => Some(PayloadItem::ConversationCreated {
            conversation: field_str(item, "conversation")?.to_string(),
            recipient: field_str(item, "recipient")?.to_string(),
        }),
        ITEM_CONVERSATION_CLOSED => Some(PayloadItem::ConversationClosed {
            conversation: field_str(item, "conversation")?.to_string(),
        }),
        ITEM_SYSTEM_NOTICE => {
            let kind = match field_str(item, "code")? {
                CODE_MESSAGE_SEND_FAILED => NoticeKind::MessageSendFailed,
                CODE_CONVERSATION_EXPIRED => NoticeKind::ConversationExpired,
                other => {
                    debug!(target: "lagoon::protocol", code = other, "unknown system notice");
                    return None;
                }
            };
            Some(PayloadItem::SystemNotice(SystemNotice {
                kind,
                conversation: field_str(item, "conversation").map(str::to_string),
                user_id: field_str(item, "user").map(str::to_string),
            }))
        }
        ITEM_ERROR => Some(PayloadItem::ServerError(ServerError {
            code: field_str(item, "code")?.to_string(),
            message: field_str(item, "message").unwrap_or_default().to_string(),
        })),
        other => {
            debug!(target: "lagoon::protocol", item_type = other, "unknown payload item type");
            None
        }
    }
}

fn decode_users(item: &WireValue) -> Vec<User> {
    let Some(entries) = item.field("users").and_then(WireValue::as_list) else {
        return Vec::new();
    };
    let mut users = Vec::with_capacity(entries.len());
    for entry in entries {
        match decode_user(entry) {
            Some(user) => users.push(user),
            None => debug!(target: "lagoon::protocol", "skipping malformed presence entry"),
        }
    }
    users
}

fn decode_user(entry: &WireValue) -> Option<User> {
    let user_id = entry.field("user").and_then(WireValue::as_str)?;
    let raw = entry.field("presence").and_then(WireValue::as_map)?;
    let mut statuses = Vec::with_capacity(raw.len());
    for (network_name, status) in raw {
        let Some(network) = NetworkId::from_name(network_name) else {
            debug!(target: "lagoon::protocol", network = %network_name, "unknown network in presence entry");
            continue;
        };
        let Some(status) = status
            .as_int()
            .and_then(|value| u8::try_from(value).ok())
            .and_then(OnlineStatus::from_ordinal)
        else {
            debug!(target: "lagoon::protocol", network = %network_name, "unparsable status ordinal");
            continue;
        };
        statuses.push((network, status));
    }
    Some(User::from_statuses(user_id, &statuses))
}

fn item_type(item: &WireValue) -> Option<&str> {
    item.field("type").and_then(WireValue::as_str)
}

fn field_str<'a>(item: &'a WireValue, key: &str) -> Option<&'a str> {
    item.field(key).and_then(WireValue::as_str)
}

/// Payload interpretation for the queue manager: session-error detection,
/// error classification, and push routing.
pub struct LagoonPolicy;

impl OutcomePolicy for LagoonPolicy {
    fn is_session_error(&self, items: &[WireValue]) -> bool {
        items.iter().any(|item| {
            item_type(item) == Some(ITEM_ERROR)
                && matches!(
                    field_str(item, "code"),
                    Some(CODE_SESSION_INVALID) | Some(CODE_SESSION_EXPIRED)
                )
        })
    }

    fn is_server_error(&self, items: &[WireValue]) -> bool {
        items.iter().any(|item| item_type(item) == Some(ITEM_ERROR))
    }

    fn route_push(&self, items: &[WireValue]) -> Option<EngineId> {
        items.iter().find_map(|item| match item_type(item)? {
            ITEM_PRESENCE_LIST | ITEM_PRESENCE_PUSH | ITEM_CHAT_MESSAGE
            | ITEM_CONVERSATION_CREATED | ITEM_CONVERSATION_CLOSED | ITEM_SYSTEM_NOTICE => {
                Some(EngineId::Presence)
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: Vec<(&str, WireValue)>) -> WireValue {
        WireValue::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        )
    }

    fn presence_item(kind: &str) -> WireValue {
        map(vec![
            ("type", WireValue::Str(kind.into())),
            (
                "users",
                WireValue::List(vec![map(vec![
                    ("user", WireValue::Str("u-1".into())),
                    (
                        "presence",
                        map(vec![
                            ("mobile", WireValue::Int(3)),
                            ("pc", WireValue::Int(1)),
                        ]),
                    ),
                ])]),
            ),
        ])
    }

    #[test]
    fn presence_list_decodes_users_and_aggregate() {
        let decoded = decode_items(&[presence_item(ITEM_PRESENCE_LIST)]);
        let [PayloadItem::PresenceList(users)] = decoded.as_slice() else {
            panic!("expected a presence list, got {decoded:?}");
        };
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id(), "u-1");
        assert_eq!(users[0].aggregate(), OnlineStatus::Online);
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let batch = map(vec![
            ("type", WireValue::Str(ITEM_PRESENCE_LIST.into())),
            (
                "users",
                WireValue::List(vec![
                    map(vec![("user", WireValue::Str("broken".into()))]),
                    map(vec![
                        ("user", WireValue::Str("u-2".into())),
                        ("presence", map(vec![("msn", WireValue::Int(2))])),
                    ]),
                ]),
            ),
        ]);
        let decoded = decode_items(&[batch, WireValue::Int(42)]);
        let [PayloadItem::PresenceList(users)] = decoded.as_slice() else {
            panic!("expected a presence list, got {decoded:?}");
        };
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id(), "u-2");
    }

    #[test]
    fn unknown_network_entries_are_dropped_within_a_user() {
        let batch = map(vec![
            ("type", WireValue::Str(ITEM_PRESENCE_PUSH.into())),
            (
                "users",
                WireValue::List(vec![map(vec![
                    ("user", WireValue::Str("u-3".into())),
                    (
                        "presence",
                        map(vec![
                            ("myspace", WireValue::Int(3)),
                            ("pc", WireValue::Int(3)),
                        ]),
                    ),
                ])]),
            ),
        ]);
        let decoded = decode_items(&[batch]);
        let [PayloadItem::AvailabilityPush(users)] = decoded.as_slice() else {
            panic!("expected an availability push, got {decoded:?}");
        };
        assert_eq!(users[0].presences().len(), 1);
    }

    #[test]
    fn policy_detects_session_errors_only_for_session_codes() {
        let policy = LagoonPolicy;
        let session_dead = map(vec![
            ("type", WireValue::Str(ITEM_ERROR.into())),
            ("code", WireValue::Str(CODE_SESSION_INVALID.into())),
        ]);
        let plain_error = map(vec![
            ("type", WireValue::Str(ITEM_ERROR.into())),
            ("code", WireValue::Str("RATE_LIMITED".into())),
        ]);
        assert!(policy.is_session_error(std::slice::from_ref(&session_dead)));
        assert!(!policy.is_session_error(std::slice::from_ref(&plain_error)));
        assert!(policy.is_server_error(&[plain_error]));
    }

    #[test]
    fn pushes_route_to_the_presence_engine() {
        let policy = LagoonPolicy;
        assert_eq!(
            policy.route_push(&[presence_item(ITEM_PRESENCE_PUSH)]),
            Some(EngineId::Presence)
        );
        assert_eq!(
            policy.route_push(&[map(vec![("type", WireValue::Str("unknown".into()))])]),
            None
        );
    }
}
