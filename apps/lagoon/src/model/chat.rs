use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::presence::NetworkId;
use super::ContactId;

pub type ConversationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// A chat message as decoded off the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub conversation: ConversationId,
    pub from: String,
    pub network: NetworkId,
    pub body: String,
}

/// One row appended to a contact's activity timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: String,
    pub contact: ContactId,
    pub network: NetworkId,
    pub direction: Direction,
    pub body: String,
    pub timestamp: SystemTime,
}

impl TimelineEntry {
    pub fn incoming(contact: ContactId, network: NetworkId, body: impl Into<String>) -> Self {
        Self::new(contact, network, Direction::Incoming, body)
    }

    pub fn outgoing(contact: ContactId, network: NetworkId, body: impl Into<String>) -> Self {
        Self::new(contact, network, Direction::Outgoing, body)
    }

    fn new(
        contact: ContactId,
        network: NetworkId,
        direction: Direction,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            contact,
            network,
            direction,
            body: body.into(),
            timestamp: SystemTime::now(),
        }
    }
}
