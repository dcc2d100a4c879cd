use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::model::chat::{ConversationId, TimelineEntry};
use crate::model::presence::{NetworkId, OnlineStatus, User};
use crate::model::ContactId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("presence record has no resolved contact id")]
    MissingContact,
    #[error("write rejected for contact {0}")]
    WriteRejected(ContactId),
}

/// The local user's own identity mapping, exempt from bulk offline resets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeProfile {
    pub contact: ContactId,
    pub user_id: String,
}

/// Abstract local persistence consumed by the engines.
///
/// The platform store behind this (SQLite, content providers, whatever the
/// host ships) is not this crate's concern.
pub trait LocalStore: Send + Sync {
    fn get_presence(&self, contact: ContactId) -> Option<User>;
    fn set_presence(&self, user: &User) -> Result<(), StoreError>;
    fn set_all_offline(&self) -> Result<(), StoreError>;
    fn set_all_offline_except(&self, contact: ContactId) -> Result<(), StoreError>;
    fn me_profile(&self) -> Option<MeProfile>;
    fn contact_for_user(&self, user_id: &str) -> Option<ContactId>;
    fn user_for_contact(&self, contact: ContactId, network: NetworkId) -> Option<String>;
    fn find_conversation(&self, contact: ContactId, network: NetworkId) -> Option<ConversationId>;
    fn set_conversation(
        &self,
        contact: ContactId,
        network: NetworkId,
        conversation: ConversationId,
    ) -> Result<(), StoreError>;
    fn remove_conversation(&self, conversation: &ConversationId) -> Result<(), StoreError>;
    fn remove_conversations_except(&self, contact: ContactId) -> Result<(), StoreError>;
    fn add_timeline_entry(&self, entry: &TimelineEntry) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    presence: HashMap<ContactId, User>,
    contacts_by_user: HashMap<String, ContactId>,
    identities: HashMap<(ContactId, NetworkId), String>,
    conversations: HashMap<(ContactId, NetworkId), ConversationId>,
    timeline: Vec<TimelineEntry>,
    me: Option<MeProfile>,
}

/// In-memory store for tests and host-less operation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    rejected_contacts: RwLock<HashSet<ContactId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contact's identity on one network.
    pub fn insert_contact(&self, contact: ContactId, network: NetworkId, user_id: &str) {
        let mut inner = self.inner.write();
        inner.contacts_by_user.insert(user_id.to_string(), contact);
        inner
            .identities
            .insert((contact, network), user_id.to_string());
    }

    pub fn set_me(&self, contact: ContactId, user_id: &str) {
        self.insert_contact(contact, NetworkId::Mobile, user_id);
        self.inner.write().me = Some(MeProfile {
            contact,
            user_id: user_id.to_string(),
        });
    }

    /// Make `set_presence` fail for one contact. Exercises the
    /// partial-failure path during batch reconciliation.
    pub fn reject_writes_for(&self, contact: ContactId) {
        self.rejected_contacts.write().insert(contact);
    }

    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.inner.read().timeline.clone()
    }

    pub fn presence_count(&self) -> usize {
        self.inner.read().presence.len()
    }

    pub fn conversation_count(&self) -> usize {
        self.inner.read().conversations.len()
    }
}

impl LocalStore for MemoryStore {
    fn get_presence(&self, contact: ContactId) -> Option<User> {
        self.inner.read().presence.get(&contact).cloned()
    }

    fn set_presence(&self, user: &User) -> Result<(), StoreError> {
        let contact = user.contact_id().ok_or(StoreError::MissingContact)?;
        if self.rejected_contacts.read().contains(&contact) {
            return Err(StoreError::WriteRejected(contact));
        }
        self.inner.write().presence.insert(contact, user.clone());
        Ok(())
    }

    fn set_all_offline(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for user in inner.presence.values_mut() {
            user.set_all(OnlineStatus::Offline);
        }
        Ok(())
    }

    fn set_all_offline_except(&self, contact: ContactId) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for (id, user) in inner.presence.iter_mut() {
            if *id != contact {
                user.set_all(OnlineStatus::Offline);
            }
        }
        Ok(())
    }

    fn me_profile(&self) -> Option<MeProfile> {
        self.inner.read().me.clone()
    }

    fn contact_for_user(&self, user_id: &str) -> Option<ContactId> {
        self.inner.read().contacts_by_user.get(user_id).copied()
    }

    fn user_for_contact(&self, contact: ContactId, network: NetworkId) -> Option<String> {
        self.inner
            .read()
            .identities
            .get(&(contact, network))
            .cloned()
    }

    fn find_conversation(&self, contact: ContactId, network: NetworkId) -> Option<ConversationId> {
        self.inner
            .read()
            .conversations
            .get(&(contact, network))
            .cloned()
    }

    fn set_conversation(
        &self,
        contact: ContactId,
        network: NetworkId,
        conversation: ConversationId,
    ) -> Result<(), StoreError> {
        self.inner
            .write()
            .conversations
            .insert((contact, network), conversation);
        Ok(())
    }

    fn remove_conversation(&self, conversation: &ConversationId) -> Result<(), StoreError> {
        self.inner
            .write()
            .conversations
            .retain(|_, existing| existing != conversation);
        Ok(())
    }

    fn remove_conversations_except(&self, contact: ContactId) -> Result<(), StoreError> {
        self.inner
            .write()
            .conversations
            .retain(|(owner, _), _| *owner == contact);
        Ok(())
    }

    fn add_timeline_entry(&self, entry: &TimelineEntry) -> Result<(), StoreError> {
        self.inner.write().timeline.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_mappings_are_per_contact_and_network() {
        let store = MemoryStore::new();
        store
            .set_conversation(1, NetworkId::Msn, "conv-a".into())
            .expect("set");
        store
            .set_conversation(1, NetworkId::Facebook, "conv-b".into())
            .expect("set");
        store
            .set_conversation(2, NetworkId::Msn, "conv-c".into())
            .expect("set");

        assert_eq!(
            store.find_conversation(1, NetworkId::Msn).as_deref(),
            Some("conv-a")
        );
        store.remove_conversations_except(1).expect("prune");
        assert_eq!(store.conversation_count(), 2);
        assert!(store.find_conversation(2, NetworkId::Msn).is_none());
    }

    #[test]
    fn offline_reset_spares_the_given_contact() {
        let store = MemoryStore::new();
        for contact in [1, 2] {
            let mut user = User::from_statuses(
                format!("u-{contact}"),
                &[(NetworkId::Mobile, OnlineStatus::Online)],
            );
            user.set_contact_id(contact);
            store.set_presence(&user).expect("seed");
        }
        store.set_all_offline_except(2).expect("reset");
        assert_eq!(
            store.get_presence(1).map(|u| u.aggregate()),
            Some(OnlineStatus::Offline)
        );
        assert_eq!(
            store.get_presence(2).map(|u| u.aggregate()),
            Some(OnlineStatus::Online)
        );
    }

    #[test]
    fn rejected_writes_surface_as_errors() {
        let store = MemoryStore::new();
        store.reject_writes_for(7);
        let mut user = User::new("u-7");
        user.set_contact_id(7);
        assert!(matches!(
            store.set_presence(&user),
            Err(StoreError::WriteRejected(7))
        ));
    }
}
