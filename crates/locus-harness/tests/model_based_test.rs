//! Model-based property tests.
//!
//! These tests generate random operation sequences and verify that the real
//! server driver behaves identically to the reference model.
//!
//! # Architecture
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!           ┌──────────────┼──────────────┐
//!           ▼              ▼              ▼
//!      ModelWorld     RealWorld       Compare
//!      (reference)    (driver)        Results
//! ```
//!
//! The model ignores time. The real side advances its clock by one
//! millisecond per operation so join times are strictly ordered (host
//! selection ties never happen) while staying far below the session TTL.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use locus_harness::model::operation::{anchor_id, fold_cap};
use locus_harness::{
    ClientId, ModelWorld, ObservableState, Operation, OperationError, OperationResult, SimEnv,
};
use locus_core::SessionPhase;
use locus_proto::{ColocalizationMethod, Message, Quat, Vec3};
use locus_server::{DriverConfig, ServerAction, ServerDriver, ServerEvent};
use proptest::prelude::*;

const NUM_CLIENTS: u8 = 4;

/// Real system wrapper that mirrors ModelWorld's interface.
struct RealWorld {
    driver: ServerDriver<SimEnv>,
    env: SimEnv,
    /// Sessions in creation order: (session id, share code).
    sessions: Vec<(String, String)>,
    /// Every participant id ever minted, mapped back to its client.
    pid_owner: HashMap<String, ClientId>,
}

impl RealWorld {
    fn new(seed: u64) -> Self {
        let env = SimEnv::with_seed(seed);
        let mut driver = ServerDriver::new(env.clone(), DriverConfig::default());

        for client in 0..NUM_CLIENTS {
            driver
                .process_event(ServerEvent::ConnectionAccepted { conn_id: conn_of(client) })
                .unwrap();
        }

        Self { driver, env, sessions: Vec::new(), pid_owner: HashMap::new() }
    }

    fn apply(&mut self, op: &Operation) -> OperationResult {
        // Strictly ordered join times; well under the TTL over any sequence.
        self.env.advance(Duration::from_millis(1));

        match op {
            Operation::CreateSession { client, cap } => self.apply_create(*client, fold_cap(*cap)),
            Operation::JoinSession { client, session_ref } => {
                self.apply_join(*client, *session_ref)
            },
            Operation::Disconnect { client } => self.apply_disconnect(*client),
            Operation::PlaceAnchor { client, slot } => self.apply_place_anchor(*client, *slot),
            Operation::RemoveAnchor { client, slot } => self.apply_remove_anchor(*client, *slot),
        }
    }

    fn apply_create(&mut self, client: ClientId, cap: u32) -> OperationResult {
        let message = Message::SessionCreate {
            display_name: Some(format!("client-{client}")),
            colocalization_method: ColocalizationMethod::default(),
            max_players: Some(cap),
        };
        let actions = self.feed(client, message);

        match first_reply(&actions, conn_of(client)) {
            Some(Message::SessionCreated { session_id, share_code, creator, .. }) => {
                self.sessions.push((session_id.clone(), share_code.clone()));
                self.pid_owner.insert(creator.id.clone(), client);
                OperationResult::Ok
            },
            Some(Message::Error { code, .. }) => OperationResult::Error(map_error_code(code)),
            other => panic!("unexpected create reply: {other:?}"),
        }
    }

    fn apply_join(&mut self, client: ClientId, session_ref: u8) -> OperationResult {
        // Mirrors the model's short-circuit: no code exists to dial.
        if self.sessions.is_empty() {
            return OperationResult::Error(OperationError::InvalidSession);
        }
        let index = usize::from(session_ref) % self.sessions.len();
        let code = self.sessions[index].1.clone();

        let message =
            Message::SessionJoin { code, display_name: Some(format!("client-{client}")) };
        let actions = self.feed(client, message);

        match first_reply(&actions, conn_of(client)) {
            Some(Message::SessionJoined { user, .. }) => {
                self.pid_owner.insert(user.id.clone(), client);
                OperationResult::Ok
            },
            Some(Message::Error { code, .. }) => OperationResult::Error(map_error_code(code)),
            other => panic!("unexpected join reply: {other:?}"),
        }
    }

    fn apply_disconnect(&mut self, client: ClientId) -> OperationResult {
        self.driver
            .process_event(ServerEvent::ConnectionClosed {
                conn_id: conn_of(client),
                reason: "simulated drop".to_string(),
            })
            .unwrap();
        OperationResult::Ok
    }

    fn apply_place_anchor(&mut self, client: ClientId, slot: u8) -> OperationResult {
        let message = Message::AnchorCreate {
            anchor_id: Some(anchor_id(slot)),
            position: Vec3::new(0.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            metadata: BTreeMap::new(),
            creator_id: None,
            created_at: None,
        };
        let actions = self.feed(client, message);
        self.reply_or_silent_ok(&actions, client)
    }

    fn apply_remove_anchor(&mut self, client: ClientId, slot: u8) -> OperationResult {
        let message = Message::AnchorDelete { anchor_id: anchor_id(slot), timestamp: None };
        let actions = self.feed(client, message);
        self.reply_or_silent_ok(&actions, client)
    }

    /// Anchor operations answer with an error or succeed silently.
    fn reply_or_silent_ok(&self, actions: &[ServerAction], client: ClientId) -> OperationResult {
        match first_reply(actions, conn_of(client)) {
            Some(Message::Error { code, .. }) => OperationResult::Error(map_error_code(code)),
            _ => OperationResult::Ok,
        }
    }

    fn feed(&mut self, client: ClientId, message: Message) -> Vec<ServerAction> {
        self.driver
            .process_event(ServerEvent::MessageReceived { conn_id: conn_of(client), message })
            .unwrap()
    }

    /// Extract observable state in the model's shape.
    fn observable_state(&self) -> ObservableState {
        let sessions = self
            .sessions
            .iter()
            .map(|(session_id, _)| {
                let Some(session) = self.driver.session(session_id) else {
                    return (false, BTreeSet::new(), None, BTreeMap::new());
                };
                if matches!(session.phase(), SessionPhase::Closing | SessionPhase::Closed) {
                    return (false, BTreeSet::new(), None, BTreeMap::new());
                }

                let members: BTreeSet<ClientId> =
                    session.participants().map(|p| self.pid_owner[&p.id]).collect();
                let host = session.host_id().map(|id| self.pid_owner[id]);
                let anchors: BTreeMap<String, ClientId> = session
                    .anchors()
                    .map(|a| (a.id.clone(), self.pid_owner[&a.creator_id]))
                    .collect();
                (true, members, host, anchors)
            })
            .collect();
        ObservableState { sessions }
    }
}

fn conn_of(client: ClientId) -> u64 {
    u64::from(client) + 1
}

/// First message sent back to the acting connection.
fn first_reply(actions: &[ServerAction], conn_id: u64) -> Option<&Message> {
    actions.iter().find_map(|action| match action {
        ServerAction::SendToConnection { conn_id: target, message } if *target == conn_id => {
            Some(message)
        },
        _ => None,
    })
}

fn map_error_code(code: &str) -> OperationError {
    match code {
        "already_in_session" => OperationError::AlreadyInSession,
        "not_in_session" => OperationError::NotInSession,
        "session_full" => OperationError::SessionFull,
        "session_not_found" | "session_expired" => OperationError::SessionClosed,
        other => panic!("unexpected error code {other}"),
    }
}

/// Strategy for generating operations over a fixed pool of clients.
fn operation_strategy() -> impl Strategy<Value = Operation> {
    let client = 0..NUM_CLIENTS;

    prop_oneof![
        // Weight towards membership churn and anchor conflicts
        2 => (client.clone(), any::<u8>())
            .prop_map(|(client, cap)| Operation::CreateSession { client, cap }),
        4 => (client.clone(), any::<u8>())
            .prop_map(|(client, session_ref)| Operation::JoinSession { client, session_ref }),
        2 => client.clone().prop_map(|client| Operation::Disconnect { client }),
        4 => (client.clone(), any::<u8>())
            .prop_map(|(client, slot)| Operation::PlaceAnchor { client, slot }),
        2 => (client, any::<u8>())
            .prop_map(|(client, slot)| Operation::RemoveAnchor { client, slot }),
    ]
}

proptest! {
    /// Verify that operation results and final states match between the
    /// model and the real driver.
    ///
    /// This is the core model-based test. It generates random operation
    /// sequences and asserts that both sides return the same result for
    /// every operation and agree on the final observable state.
    #[test]
    fn prop_model_matches_real(
        seed in any::<u64>(),
        ops in prop::collection::vec(operation_strategy(), 0..50)
    ) {
        let mut model = ModelWorld::new();
        let mut real = RealWorld::new(seed);

        for (i, op) in ops.iter().enumerate() {
            let model_result = model.apply(op);
            let real_result = real.apply(op);

            prop_assert_eq!(
                model_result,
                real_result,
                "Divergence at operation {}: {:?}\nModel: {:?}\nReal: {:?}",
                i, op, model_result, real_result
            );
        }

        prop_assert_eq!(model.observable_state(), real.observable_state());
    }

    /// Verify model invariants hold after any operation sequence.
    #[test]
    fn prop_model_invariants(
        ops in prop::collection::vec(operation_strategy(), 0..100)
    ) {
        let mut model = ModelWorld::new();
        for op in ops {
            let _ = model.apply(&op);
        }

        let state = model.observable_state();
        let mut seen: BTreeSet<ClientId> = BTreeSet::new();

        for (i, (open, members, host, _anchors)) in state.sessions.iter().enumerate() {
            if *open {
                // Open sessions are never empty and carry exactly one host,
                // drawn from their own roster.
                prop_assert!(!members.is_empty(), "open session {} has no members", i);
                prop_assert!(host.is_some(), "open session {} has no host", i);
                let host = host.unwrap();
                prop_assert!(members.contains(&host), "host of session {} is a stranger", i);
            } else {
                prop_assert!(members.is_empty(), "closed session {} kept members", i);
                prop_assert!(host.is_none(), "closed session {} kept a host", i);
            }

            // No client occupies two sessions at once.
            for member in members {
                prop_assert!(seen.insert(*member), "client {} is in two sessions", member);
            }
        }
    }

    /// A session whose last participant left never admits another join.
    #[test]
    fn prop_join_after_close_rejected(
        creator in 0..NUM_CLIENTS,
        joiner in 0..NUM_CLIENTS,
    ) {
        prop_assume!(creator != joiner);

        let mut model = ModelWorld::new();
        let created = model.apply(&Operation::CreateSession { client: creator, cap: 3 });
        prop_assert!(created.is_ok());

        model.apply(&Operation::Disconnect { client: creator });

        let result = model.apply(&Operation::JoinSession { client: joiner, session_ref: 0 });
        prop_assert_eq!(result, OperationResult::Error(OperationError::SessionClosed));
    }
}
