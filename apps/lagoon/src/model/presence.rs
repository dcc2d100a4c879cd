use serde::{Deserialize, Serialize};

use super::ContactId;

/// The networks a contact can be reachable on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkId {
    Mobile,
    Pc,
    GoogleTalk,
    Msn,
    Facebook,
}

impl NetworkId {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkId::Mobile => "mobile",
            NetworkId::Pc => "pc",
            NetworkId::GoogleTalk => "google",
            NetworkId::Msn => "msn",
            NetworkId::Facebook => "facebook",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mobile" => Some(NetworkId::Mobile),
            "pc" => Some(NetworkId::Pc),
            "google" => Some(NetworkId::GoogleTalk),
            "msn" => Some(NetworkId::Msn),
            "facebook" => Some(NetworkId::Facebook),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        match self {
            NetworkId::Mobile => 0,
            NetworkId::Pc => 1,
            NetworkId::GoogleTalk => 2,
            NetworkId::Msn => 3,
            NetworkId::Facebook => 4,
        }
    }
}

/// Per-network availability, ordered by aggregation precedence:
/// online beats invisible beats idle beats offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OnlineStatus {
    Offline,
    Idle,
    Invisible,
    Online,
}

impl OnlineStatus {
    pub fn ordinal(self) -> u8 {
        match self {
            OnlineStatus::Offline => 0,
            OnlineStatus::Idle => 1,
            OnlineStatus::Invisible => 2,
            OnlineStatus::Online => 3,
        }
    }

    pub fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(OnlineStatus::Offline),
            1 => Some(OnlineStatus::Idle),
            2 => Some(OnlineStatus::Invisible),
            3 => Some(OnlineStatus::Online),
            _ => None,
        }
    }
}

/// One (user, network, status) triple as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPresence {
    pub user_id: String,
    pub network: NetworkId,
    pub status: OnlineStatus,
}

/// A contact's presence across every network it is reachable on.
///
/// The aggregated status is derived once at construction; after entries are
/// removed the caller recomputes it explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    user_id: String,
    contact_id: Option<ContactId>,
    aggregate: OnlineStatus,
    presences: Vec<NetworkPresence>,
}

impl User {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            contact_id: None,
            aggregate: OnlineStatus::Offline,
            presences: Vec::new(),
        }
    }

    pub fn from_statuses(
        user_id: impl Into<String>,
        statuses: &[(NetworkId, OnlineStatus)],
    ) -> Self {
        let user_id = user_id.into();
        let presences: Vec<NetworkPresence> = statuses
            .iter()
            .map(|(network, status)| NetworkPresence {
                user_id: user_id.clone(),
                network: *network,
                status: *status,
            })
            .collect();
        let aggregate = aggregate_of(&presences);
        Self {
            user_id,
            contact_id: None,
            aggregate,
            presences,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn contact_id(&self) -> Option<ContactId> {
        self.contact_id
    }

    pub fn set_contact_id(&mut self, contact: ContactId) {
        self.contact_id = Some(contact);
    }

    pub fn aggregate(&self) -> OnlineStatus {
        self.aggregate
    }

    pub fn presences(&self) -> &[NetworkPresence] {
        &self.presences
    }

    pub fn status_on(&self, network: NetworkId) -> Option<OnlineStatus> {
        self.presences
            .iter()
            .find(|presence| presence.network == network)
            .map(|presence| presence.status)
    }

    /// Drop the entry for one network. The aggregate is left untouched;
    /// call `recompute_aggregate` when done removing.
    pub fn remove_network(&mut self, network: NetworkId) {
        self.presences.retain(|presence| presence.network != network);
    }

    pub fn recompute_aggregate(&mut self) {
        self.aggregate = aggregate_of(&self.presences);
    }

    /// Set one network's status, inserting the entry if it is new.
    pub fn set_status(&mut self, network: NetworkId, status: OnlineStatus) {
        match self
            .presences
            .iter_mut()
            .find(|presence| presence.network == network)
        {
            Some(presence) => presence.status = status,
            None => self.presences.push(NetworkPresence {
                user_id: self.user_id.clone(),
                network,
                status,
            }),
        }
        self.recompute_aggregate();
    }

    /// Set every network to the same status. A record with no entries yet
    /// gets a mobile entry so the status is representable at all.
    pub fn set_all(&mut self, status: OnlineStatus) {
        if self.presences.is_empty() {
            self.presences.push(NetworkPresence {
                user_id: self.user_id.clone(),
                network: NetworkId::Mobile,
                status,
            });
        } else {
            for presence in &mut self.presences {
                presence.status = status;
            }
        }
        self.recompute_aggregate();
    }
}

fn aggregate_of(presences: &[NetworkPresence]) -> OnlineStatus {
    for wanted in [
        OnlineStatus::Online,
        OnlineStatus::Invisible,
        OnlineStatus::Idle,
    ] {
        if presences.iter().any(|presence| presence.status == wanted) {
            return wanted;
        }
    }
    OnlineStatus::Offline
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_wins_over_invisible_and_idle() {
        let user = User::from_statuses(
            "u-1",
            &[
                (NetworkId::Pc, OnlineStatus::Idle),
                (NetworkId::GoogleTalk, OnlineStatus::Invisible),
                (NetworkId::Mobile, OnlineStatus::Online),
            ],
        );
        assert_eq!(user.aggregate(), OnlineStatus::Online);
    }

    #[test]
    fn invisible_wins_over_idle() {
        let user = User::from_statuses(
            "u-1",
            &[
                (NetworkId::Pc, OnlineStatus::Idle),
                (NetworkId::Msn, OnlineStatus::Invisible),
            ],
        );
        assert_eq!(user.aggregate(), OnlineStatus::Invisible);
    }

    #[test]
    fn all_offline_aggregates_offline() {
        let user = User::from_statuses(
            "u-1",
            &[
                (NetworkId::Pc, OnlineStatus::Offline),
                (NetworkId::Mobile, OnlineStatus::Offline),
            ],
        );
        assert_eq!(user.aggregate(), OnlineStatus::Offline);
    }

    #[test]
    fn aggregate_is_recomputed_after_removal() {
        let mut user = User::from_statuses(
            "u-1",
            &[
                (NetworkId::Pc, OnlineStatus::Online),
                (NetworkId::Mobile, OnlineStatus::Idle),
            ],
        );
        user.remove_network(NetworkId::Pc);
        assert_eq!(user.aggregate(), OnlineStatus::Online, "stale until recomputed");
        user.recompute_aggregate();
        assert_eq!(user.aggregate(), OnlineStatus::Idle);
    }

    #[test]
    fn set_all_on_empty_record_creates_a_mobile_entry() {
        let mut user = User::new("u-2");
        user.set_all(OnlineStatus::Online);
        assert_eq!(user.presences().len(), 1);
        assert_eq!(user.presences()[0].network, NetworkId::Mobile);
        assert_eq!(user.aggregate(), OnlineStatus::Online);
    }
}
