use std::collections::VecDeque;

use crate::request::{EngineId, RequestId};
use crate::value::WireValue;

/// Terminal classification of an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Normal,
    ServerError,
    TimedOut,
    Push,
}

/// One decoded or synthesized inbound result awaiting pickup by its owner.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub request_id: Option<RequestId>,
    pub owner: EngineId,
    pub kind: OutcomeKind,
    pub items: Vec<WireValue>,
}

impl Outcome {
    pub(crate) fn timed_out(request_id: RequestId, owner: EngineId) -> Self {
        Self {
            request_id: Some(request_id),
            owner,
            kind: OutcomeKind::TimedOut,
            items: Vec::new(),
        }
    }
}

/// Decoded and synthesized outcomes, claimed one at a time per owner.
///
/// Like the request queue, only ever touched under the queue manager's lock.
#[derive(Default)]
pub(crate) struct ResponseQueue {
    outcomes: VecDeque<Outcome>,
}

impl ResponseQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, outcome: Outcome) {
        self.outcomes.push_back(outcome);
    }

    /// Remove and return the oldest outcome belonging to the given owner.
    /// Single-consumer-per-owner pull, not a broadcast.
    pub(crate) fn claim(&mut self, owner: EngineId) -> Option<Outcome> {
        let index = self
            .outcomes
            .iter()
            .position(|outcome| outcome.owner == owner)?;
        self.outcomes.remove(index)
    }

    pub(crate) fn has_outcome_for(&self, owner: EngineId) -> bool {
        self.outcomes.iter().any(|outcome| outcome.owner == owner)
    }

    /// Whether an outcome correlated to the given request is already queued.
    /// Guards against double-synthesis when a sweep races a late arrival.
    pub(crate) fn exists(&self, request_id: RequestId) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.request_id == Some(request_id))
    }

    pub(crate) fn len(&self) -> usize {
        self.outcomes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(owner: EngineId, request_id: Option<RequestId>) -> Outcome {
        Outcome {
            request_id,
            owner,
            kind: OutcomeKind::Normal,
            items: Vec::new(),
        }
    }

    #[test]
    fn claim_returns_oldest_for_owner() {
        let mut queue = ResponseQueue::new();
        queue.push(outcome(EngineId::Contacts, Some(1)));
        queue.push(outcome(EngineId::Presence, Some(2)));
        queue.push(outcome(EngineId::Presence, Some(3)));

        let first = queue.claim(EngineId::Presence).expect("outcome");
        assert_eq!(first.request_id, Some(2));
        let second = queue.claim(EngineId::Presence).expect("outcome");
        assert_eq!(second.request_id, Some(3));
        assert!(queue.claim(EngineId::Presence).is_none());
        assert!(queue.has_outcome_for(EngineId::Contacts));
    }

    #[test]
    fn exists_matches_correlated_outcomes_only() {
        let mut queue = ResponseQueue::new();
        queue.push(outcome(EngineId::Presence, None));
        assert!(!queue.exists(9));
        queue.push(outcome(EngineId::Presence, Some(9)));
        assert!(queue.exists(9));
    }
}
