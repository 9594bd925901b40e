//! Model world: the reference session server.
//!
//! A time-free, obviously-correct rendition of the session rules: one host
//! per session chosen by join order, participant caps, creator-or-host
//! anchor deletion, first-writer anchor ownership. The real driver is
//! compared against it over random operation sequences.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::operation::{
    ClientId, Operation, OperationError, OperationResult, anchor_id, fold_cap,
};

/// One modeled session.
#[derive(Debug, Clone)]
struct ModelSession {
    open: bool,
    cap: u32,
    /// Members in join order; the head is the host.
    members: Vec<ClientId>,
    /// Anchor id to creator.
    anchors: BTreeMap<String, ClientId>,
}

/// Observable state for oracle comparison.
///
/// One entry per session in creation order. Closed sessions collapse to an
/// empty entry on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Per-session `(open, members, host, anchors)`.
    pub sessions: Vec<(bool, BTreeSet<ClientId>, Option<ClientId>, BTreeMap<String, ClientId>)>,
}

/// Model world - the reference implementation.
#[derive(Debug, Clone, Default)]
pub struct ModelWorld {
    sessions: Vec<ModelSession>,
    /// Which session each client currently occupies.
    membership: HashMap<ClientId, usize>,
}

impl ModelWorld {
    /// Create an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions ever created.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Apply an operation and return the result.
    ///
    /// This is the main entry point for model-based testing; the result
    /// must match the real driver's result for the same operation.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match op {
            Operation::CreateSession { client, cap } => self.create(*client, fold_cap(*cap)),
            Operation::JoinSession { client, session_ref } => self.join(*client, *session_ref),
            Operation::Disconnect { client } => self.disconnect(*client),
            Operation::PlaceAnchor { client, slot } => self.place_anchor(*client, *slot),
            Operation::RemoveAnchor { client, slot } => self.remove_anchor(*client, *slot),
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        let sessions = self
            .sessions
            .iter()
            .map(|s| {
                if s.open {
                    (
                        true,
                        s.members.iter().copied().collect(),
                        s.members.first().copied(),
                        s.anchors.clone(),
                    )
                } else {
                    (false, BTreeSet::new(), None, BTreeMap::new())
                }
            })
            .collect();
        ObservableState { sessions }
    }

    fn create(&mut self, client: ClientId, cap: u32) -> OperationResult {
        if self.membership.contains_key(&client) {
            return OperationResult::Error(OperationError::AlreadyInSession);
        }
        self.sessions.push(ModelSession {
            open: true,
            cap,
            members: vec![client],
            anchors: BTreeMap::new(),
        });
        self.membership.insert(client, self.sessions.len() - 1);
        OperationResult::Ok
    }

    fn join(&mut self, client: ClientId, session_ref: u8) -> OperationResult {
        if self.membership.contains_key(&client) {
            return OperationResult::Error(OperationError::AlreadyInSession);
        }
        if self.sessions.is_empty() {
            return OperationResult::Error(OperationError::InvalidSession);
        }
        let index = usize::from(session_ref) % self.sessions.len();
        let session = &mut self.sessions[index];
        if !session.open {
            return OperationResult::Error(OperationError::SessionClosed);
        }
        if session.members.len() >= session.cap as usize {
            return OperationResult::Error(OperationError::SessionFull);
        }
        session.members.push(client);
        self.membership.insert(client, index);
        OperationResult::Ok
    }

    fn disconnect(&mut self, client: ClientId) -> OperationResult {
        // Dropping an unbound connection is a no-op on both sides.
        let Some(index) = self.membership.remove(&client) else {
            return OperationResult::Ok;
        };
        let session = &mut self.sessions[index];
        session.members.retain(|m| *m != client);
        if session.members.is_empty() {
            session.open = false;
            session.anchors.clear();
        }
        OperationResult::Ok
    }

    fn place_anchor(&mut self, client: ClientId, slot: u8) -> OperationResult {
        let Some(&index) = self.membership.get(&client) else {
            return OperationResult::Error(OperationError::NotInSession);
        };
        let session = &mut self.sessions[index];
        let id = anchor_id(slot);
        // First writer keeps ownership; a conflicting create is a silent
        // no-op, a same-creator create is an update.
        session.anchors.entry(id).or_insert(client);
        OperationResult::Ok
    }

    fn remove_anchor(&mut self, client: ClientId, slot: u8) -> OperationResult {
        let Some(&index) = self.membership.get(&client) else {
            return OperationResult::Error(OperationError::NotInSession);
        };
        let session = &mut self.sessions[index];
        let id = anchor_id(slot);
        let host = session.members.first().copied();
        if let Some(&creator) = session.anchors.get(&id) {
            // Creator or host may delete; anyone else is a silent no-op.
            if creator == client || host == Some(client) {
                session.anchors.remove(&id);
            }
        }
        OperationResult::Ok
    }
}
