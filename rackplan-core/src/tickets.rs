//! Optimistic mutation tickets
//!
//! Every remote call made on behalf of an entity opens a ticket that
//! correlates the request with its eventual reply. Open tickets tell the
//! reconciliation bridge which entities are in flight; settled ones are kept
//! (bounded) for inspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::entity::Attributes;
use crate::ids::{LocalId, RemoteId, TicketId};

/// Default number of settled tickets retained
pub const DEFAULT_SETTLED_CAPACITY: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum TicketOutcome {
    InFlight,
    Succeeded(RemoteId),
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationTicket {
    pub id: TicketId,
    pub local_id: LocalId,
    pub op: MutationOp,
    /// Attributes before the mutation, for rollback or inspection
    pub previous: Option<Attributes>,
    pub opened_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub outcome: TicketOutcome,
}

#[derive(Debug)]
pub struct TicketLedger {
    open: HashMap<TicketId, MutationTicket>,
    settled: VecDeque<MutationTicket>,
    capacity: usize,
}

impl Default for TicketLedger {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLED_CAPACITY)
    }
}

impl TicketLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            open: HashMap::new(),
            settled: VecDeque::new(),
            capacity,
        }
    }

    pub fn open(&mut self, local_id: &LocalId, op: MutationOp, previous: Option<Attributes>) -> TicketId {
        let ticket = MutationTicket {
            id: TicketId::new(),
            local_id: local_id.clone(),
            op,
            previous,
            opened_at: Utc::now(),
            settled_at: None,
            outcome: TicketOutcome::InFlight,
        };
        let id = ticket.id.clone();
        self.open.insert(id.clone(), ticket);
        id
    }

    /// Close a ticket. Returns the settled copy, `None` if unknown.
    pub fn settle(&mut self, id: &TicketId, outcome: TicketOutcome) -> Option<MutationTicket> {
        let mut ticket = self.open.remove(id)?;
        ticket.outcome = outcome;
        ticket.settled_at = Some(Utc::now());
        if self.capacity > 0 {
            while self.settled.len() >= self.capacity {
                self.settled.pop_front();
            }
            self.settled.push_back(ticket.clone());
        }
        Some(ticket)
    }

    pub fn is_in_flight(&self, local_id: &LocalId) -> bool {
        self.open.values().any(|t| &t.local_id == local_id)
    }

    /// Local ids with at least one open ticket
    pub fn in_flight(&self) -> HashSet<LocalId> {
        self.open.values().map(|t| t.local_id.clone()).collect()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_tickets(&self) -> Vec<&MutationTicket> {
        let mut tickets: Vec<_> = self.open.values().collect();
        tickets.sort_by_key(|t| t.opened_at);
        tickets
    }

    /// Settled tickets, oldest first
    pub fn settled(&self) -> impl Iterator<Item = &MutationTicket> {
        self.settled.iter()
    }

    pub fn clear(&mut self) {
        self.open.clear();
        self.settled.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_settle() {
        let mut ledger = TicketLedger::new(2);
        let id = LocalId::from_string("a");
        let t = ledger.open(&id, MutationOp::Create, None);
        assert!(ledger.is_in_flight(&id));
        assert_eq!(ledger.in_flight(), HashSet::from([id.clone()]));

        let settled = ledger
            .settle(&t, TicketOutcome::Succeeded(RemoteId::from_string("r1")))
            .unwrap();
        assert!(settled.settled_at.is_some());
        assert!(!ledger.is_in_flight(&id));
        assert!(ledger.settle(&t, TicketOutcome::InFlight).is_none());
    }

    #[test]
    fn test_settled_is_bounded() {
        let mut ledger = TicketLedger::new(2);
        for name in ["a", "b", "c"] {
            let t = ledger.open(&LocalId::from_string(name), MutationOp::Update, None);
            ledger.settle(&t, TicketOutcome::Failed("boom".into()));
        }
        let kept: Vec<_> = ledger.settled().map(|t| t.local_id.as_str()).collect();
        assert_eq!(kept, vec!["b", "c"]);
    }
}
