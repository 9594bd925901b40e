//! Connection registry.
//!
//! Tracks which transport connection belongs to which session participant.
//! The driver consults this to fan broadcasts out to connection ids and to
//! tear session state down when a socket drops.

use std::collections::HashMap;

use locus_core::{ParticipantId, SessionId};

/// Where a connection is bound.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Session the connection joined.
    pub session_id: SessionId,
    /// Participant identity on that connection.
    pub participant_id: ParticipantId,
}

/// Bidirectional connection ⇄ participant index.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_conn: HashMap<u64, Binding>,
    by_participant: HashMap<(SessionId, ParticipantId), u64>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bound connections.
    pub fn len(&self) -> usize {
        self.by_conn.len()
    }

    /// Whether no connections are bound.
    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }

    /// Bind a connection to a session participant. A connection binds at
    /// most once; rebinding replaces the previous binding.
    pub fn bind(&mut self, conn_id: u64, session_id: SessionId, participant_id: ParticipantId) {
        if let Some(old) = self.by_conn.remove(&conn_id) {
            self.by_participant.remove(&(old.session_id, old.participant_id));
        }
        self.by_participant.insert((session_id.clone(), participant_id.clone()), conn_id);
        self.by_conn.insert(conn_id, Binding { session_id, participant_id });
    }

    /// Remove a connection's binding, returning it if one existed.
    pub fn unbind(&mut self, conn_id: u64) -> Option<Binding> {
        let binding = self.by_conn.remove(&conn_id)?;
        self.by_participant
            .remove(&(binding.session_id.clone(), binding.participant_id.clone()));
        Some(binding)
    }

    /// Look up the binding for a connection.
    pub fn binding(&self, conn_id: u64) -> Option<&Binding> {
        self.by_conn.get(&conn_id)
    }

    /// Connection id for a participant in a session, if online.
    pub fn conn_for(&self, session_id: &str, participant_id: &str) -> Option<u64> {
        self.by_participant
            .get(&(session_id.to_string(), participant_id.to_string()))
            .copied()
    }

    /// All `(conn_id, participant_id)` pairs bound to a session.
    pub fn connections_in(&self, session_id: &str) -> Vec<(u64, ParticipantId)> {
        self.by_conn
            .iter()
            .filter(|(_, b)| b.session_id == session_id)
            .map(|(conn_id, b)| (*conn_id, b.participant_id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_lookup() {
        let mut r = ConnectionRegistry::new();
        r.bind(1, "s1".to_string(), "anon_a".to_string());

        assert_eq!(r.len(), 1);
        assert_eq!(r.binding(1).map(|b| b.participant_id.as_str()), Some("anon_a"));
        assert_eq!(r.conn_for("s1", "anon_a"), Some(1));
    }

    #[test]
    fn unbind_clears_both_directions() {
        let mut r = ConnectionRegistry::new();
        r.bind(1, "s1".to_string(), "anon_a".to_string());

        let binding = r.unbind(1).expect("binding existed");
        assert_eq!(binding.session_id, "s1");
        assert!(r.is_empty());
        assert_eq!(r.conn_for("s1", "anon_a"), None);
    }

    #[test]
    fn rebind_replaces_previous() {
        let mut r = ConnectionRegistry::new();
        r.bind(1, "s1".to_string(), "anon_a".to_string());
        r.bind(1, "s2".to_string(), "anon_b".to_string());

        assert_eq!(r.len(), 1);
        assert_eq!(r.conn_for("s1", "anon_a"), None);
        assert_eq!(r.conn_for("s2", "anon_b"), Some(1));
    }

    #[test]
    fn connections_in_filters_by_session() {
        let mut r = ConnectionRegistry::new();
        r.bind(1, "s1".to_string(), "anon_a".to_string());
        r.bind(2, "s1".to_string(), "anon_b".to_string());
        r.bind(3, "s2".to_string(), "anon_c".to_string());

        let mut conns = r.connections_in("s1");
        conns.sort_unstable();
        assert_eq!(conns, vec![(1, "anon_a".to_string()), (2, "anon_b".to_string())]);
    }
}
