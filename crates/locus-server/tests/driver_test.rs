//! Server driver tests.
//!
//! Drive the sans-IO driver through full session lifecycles with a
//! controllable clock and assert on the produced actions.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use locus_core::Environment;
use locus_proto::{ColocalizationMethod, CoordinateSystem, Message, Pose, Quat, TrackingState, Vec3};
use locus_server::{DriverConfig, ServerAction, ServerDriver, ServerEvent};

/// Deterministic environment with an advanceable clock.
#[derive(Clone)]
struct TestEnv {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
    seed: Arc<Mutex<u64>>,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
            seed: Arc::new(Mutex::new(0x1234_5678_9abc_def0)),
        }
    }

    fn advance(&self, d: Duration) {
        *self.offset.lock().unwrap() += d;
    }
}

impl Environment for TestEnv {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    fn unix_time(&self) -> f64 {
        self.offset.lock().unwrap().as_secs_f64()
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let mut seed = self.seed.lock().unwrap();
        for byte in buffer.iter_mut() {
            *seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            *byte = (*seed >> 33) as u8;
        }
    }
}

fn driver(env: &TestEnv) -> ServerDriver<TestEnv> {
    ServerDriver::new(env.clone(), DriverConfig::default())
}

fn pose(x: f64) -> Pose {
    Pose {
        position: Vec3::new(x, 0.0, 0.0),
        rotation: Quat::IDENTITY,
        confidence: 1.0,
        tracking_state: TrackingState::Tracking,
        timestamp: 0.0,
    }
}

/// Messages sent to one connection, in order.
fn sent_to(actions: &[ServerAction], conn_id: u64) -> Vec<Message> {
    actions
        .iter()
        .filter_map(|a| match a {
            ServerAction::SendToConnection { conn_id: c, message } if *c == conn_id => {
                Some(message.clone())
            },
            _ => None,
        })
        .collect()
}

fn closes_for(actions: &[ServerAction], conn_id: u64) -> usize {
    actions
        .iter()
        .filter(|a| matches!(a, ServerAction::CloseConnection { conn_id: c, .. } if *c == conn_id))
        .count()
}

/// Create a session on `conn_id`; returns `(session_id, share_code, user_id)`.
fn create_session(d: &mut ServerDriver<TestEnv>, conn_id: u64) -> (String, String, String) {
    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id,
            message: Message::SessionCreate {
                display_name: None,
                colocalization_method: ColocalizationMethod::QrCode,
                max_players: None,
            },
        })
        .unwrap();
    for message in sent_to(&actions, conn_id) {
        if let Message::SessionCreated { session_id, share_code, creator, .. } = message {
            return (session_id, share_code, creator.id);
        }
    }
    panic!("no session_created in {actions:?}");
}

/// Join `conn_id` to a session by code; returns the new participant id.
fn join_session(d: &mut ServerDriver<TestEnv>, conn_id: u64, code: &str) -> String {
    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id,
            message: Message::SessionJoin { code: code.to_string(), display_name: None },
        })
        .unwrap();
    for message in sent_to(&actions, conn_id) {
        if let Message::SessionJoined { user, .. } = message {
            return user.id;
        }
    }
    panic!("no session_joined in {actions:?}");
}

fn colocalize(d: &mut ServerDriver<TestEnv>, conn_id: u64) {
    d.process_event(ServerEvent::MessageReceived {
        conn_id,
        message: Message::ColocalizationData {
            user_id: None,
            colocalized: Some(true),
            coordinate_system: None,
            method: None,
        },
    })
    .unwrap();
}

#[test]
fn create_returns_code_and_snapshot() {
    let env = TestEnv::new();
    let mut d = driver(&env);

    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 1,
            message: Message::SessionCreate {
                display_name: Some("Ada".to_string()),
                colocalization_method: ColocalizationMethod::QrCode,
                max_players: Some(4),
            },
        })
        .unwrap();

    let messages = sent_to(&actions, 1);
    let Message::SessionCreated { share_code, creator, max_players, expires_in, .. } = &messages[0]
    else {
        panic!("expected session_created, got {:?}", messages[0]);
    };
    assert_eq!(share_code.len(), 6);
    assert!(share_code[..3].chars().all(|c| c.is_ascii_uppercase()));
    assert!(share_code[3..].chars().all(|c| c.is_ascii_digit()));
    assert_eq!(creator.display_name, "Ada");
    assert_eq!(*max_players, 4);
    assert_eq!(*expires_in, 3600);

    // The creator also receives the initial snapshot.
    assert!(messages.iter().any(|m| matches!(m, Message::SessionState { .. })));
    assert_eq!(d.session_count(), 1);
}

#[test]
fn join_by_code_notifies_existing_participants() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    let (_, code, creator_id) = create_session(&mut d, 1);

    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 2,
            message: Message::SessionJoin { code: code.clone(), display_name: None },
        })
        .unwrap();

    // Joiner gets session_joined then the snapshot.
    let to_joiner = sent_to(&actions, 2);
    assert!(matches!(&to_joiner[0], Message::SessionJoined { .. }));
    let snapshot = to_joiner
        .iter()
        .find_map(|m| match m {
            Message::SessionState { participants, host_id, .. } => {
                Some((participants.clone(), host_id.clone()))
            },
            _ => None,
        })
        .expect("joiner snapshot");
    assert_eq!(snapshot.0.len(), 2);
    assert_eq!(snapshot.1.as_deref(), Some(creator_id.as_str()));

    // Creator sees user_joined.
    assert!(sent_to(&actions, 1)
        .iter()
        .any(|m| matches!(m, Message::UserJoined { is_host: false, .. })));
}

#[test]
fn join_lowercase_code_is_accepted() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    let (_, code, _) = create_session(&mut d, 1);

    join_session(&mut d, 2, &code.to_lowercase());
}

#[test]
fn join_malformed_code_rejected() {
    let env = TestEnv::new();
    let mut d = driver(&env);

    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 1,
            message: Message::SessionJoin { code: "123ABC".to_string(), display_name: None },
        })
        .unwrap();
    assert!(sent_to(&actions, 1)
        .iter()
        .any(|m| matches!(m, Message::Error { code, .. } if code == "invalid_code_format")));
}

#[test]
fn join_unknown_code_rejected() {
    let env = TestEnv::new();
    let mut d = driver(&env);

    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 1,
            message: Message::SessionJoin { code: "ZZZ999".to_string(), display_name: None },
        })
        .unwrap();
    assert!(sent_to(&actions, 1)
        .iter()
        .any(|m| matches!(m, Message::Error { code, .. } if code == "session_not_found")));
}

#[test]
fn join_full_session_rejected() {
    let env = TestEnv::new();
    let mut d = driver(&env);

    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 1,
            message: Message::SessionCreate {
                display_name: None,
                colocalization_method: ColocalizationMethod::QrCode,
                max_players: Some(2),
            },
        })
        .unwrap();
    let code = sent_to(&actions, 1)
        .iter()
        .find_map(|m| match m {
            Message::SessionCreated { share_code, .. } => Some(share_code.clone()),
            _ => None,
        })
        .unwrap();

    join_session(&mut d, 2, &code);

    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 3,
            message: Message::SessionJoin { code, display_name: None },
        })
        .unwrap();
    assert!(sent_to(&actions, 3)
        .iter()
        .any(|m| matches!(m, Message::Error { code, .. } if code == "session_full")));
}

#[test]
fn message_before_join_rejected() {
    let env = TestEnv::new();
    let mut d = driver(&env);

    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 7,
            message: Message::ChatMessage {
                user_id: None,
                message: "hello?".to_string(),
                timestamp: None,
            },
        })
        .unwrap();
    assert!(sent_to(&actions, 7)
        .iter()
        .any(|m| matches!(m, Message::Error { code, .. } if code == "not_in_session")));
}

#[test]
fn pose_fanout_reaches_colocalized_peers_only() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    let (_, code, _) = create_session(&mut d, 1);
    join_session(&mut d, 2, &code);
    join_session(&mut d, 3, &code);

    // Sender and conn 2 are colocalized, conn 3 is not.
    colocalize(&mut d, 1);
    colocalize(&mut d, 2);

    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 1,
            message: Message::PoseUpdate { user_id: None, pose: pose(1.0) },
        })
        .unwrap();

    assert!(sent_to(&actions, 2).iter().any(|m| matches!(m, Message::PoseUpdate { .. })));
    assert!(sent_to(&actions, 3).iter().all(|m| !matches!(m, Message::PoseUpdate { .. })));
    // Never echoed to the sender.
    assert!(sent_to(&actions, 1).iter().all(|m| !matches!(m, Message::PoseUpdate { .. })));
}

#[test]
fn pose_with_out_of_bounds_position_rejected() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    let (_, code, _) = create_session(&mut d, 1);
    join_session(&mut d, 2, &code);
    colocalize(&mut d, 1);
    colocalize(&mut d, 2);

    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 1,
            message: Message::PoseUpdate { user_id: None, pose: pose(5000.0) },
        })
        .unwrap();

    assert!(sent_to(&actions, 1)
        .iter()
        .any(|m| matches!(m, Message::Error { code, .. } if code == "invalid_payload")));
    assert!(sent_to(&actions, 2).is_empty());
}

// Scenario: A creates and B joins; both place anchors; A disconnects; B
// becomes host and exercises host authority by deleting A's anchor.
#[test]
fn host_transfer_and_host_override_delete() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    let (_, code, creator_id) = create_session(&mut d, 1);
    env.advance(Duration::from_secs(1));
    let b_id = join_session(&mut d, 2, &code);

    d.process_event(ServerEvent::MessageReceived {
        conn_id: 1,
        message: Message::AnchorCreate {
            anchor_id: Some("anchor_a".to_string()),
            position: Vec3::new(1.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            metadata: BTreeMap::new(),
            creator_id: None,
            created_at: None,
        },
    })
    .unwrap();
    d.process_event(ServerEvent::MessageReceived {
        conn_id: 2,
        message: Message::AnchorCreate {
            anchor_id: Some("anchor_b".to_string()),
            position: Vec3::new(2.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            metadata: BTreeMap::new(),
            creator_id: None,
            created_at: None,
        },
    })
    .unwrap();

    // B may not delete A's anchor while A holds host authority... it is
    // A's anchor and B is not host, so the delete is a silent no-op.
    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 2,
            message: Message::AnchorDelete { anchor_id: "anchor_a".to_string(), timestamp: None },
        })
        .unwrap();
    assert!(sent_to(&actions, 1).iter().all(|m| !matches!(m, Message::AnchorDelete { .. })));

    // A disconnects; B is promoted.
    let actions = d
        .process_event(ServerEvent::ConnectionClosed { conn_id: 1, reason: "eof".to_string() })
        .unwrap();
    let to_b = sent_to(&actions, 2);
    assert!(to_b
        .iter()
        .any(|m| matches!(m, Message::UserLeft { user_id, .. } if user_id == &creator_id)));
    assert!(to_b
        .iter()
        .any(|m| matches!(m, Message::HostChanged { user_id, .. } if user_id == &b_id)));

    // As host, B now deletes A's orphaned anchor.
    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 2,
            message: Message::AnchorDelete { anchor_id: "anchor_a".to_string(), timestamp: None },
        })
        .unwrap();
    assert!(sent_to(&actions, 2)
        .iter()
        .any(|m| matches!(m, Message::AnchorDelete { anchor_id, .. } if anchor_id == "anchor_a")));
}

#[test]
fn coordinate_system_from_host_broadcasts_to_all() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    let (_, code, _) = create_session(&mut d, 1);
    join_session(&mut d, 2, &code);

    let frame = CoordinateSystem { origin: Vec3::new(0.5, 0.0, 0.0), rotation: Quat::IDENTITY };
    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 1,
            message: Message::ColocalizationData {
                user_id: None,
                colocalized: Some(true),
                coordinate_system: Some(frame),
                method: Some(ColocalizationMethod::QrCode),
            },
        })
        .unwrap();

    assert!(sent_to(&actions, 2)
        .iter()
        .any(|m| matches!(m, Message::CoordinateSystem { is_colocalized: true, .. })));
}

#[test]
fn ping_answers_pong_with_both_clocks() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    create_session(&mut d, 1);

    env.advance(Duration::from_secs(2));
    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 1,
            message: Message::Ping { timestamp: 1.5 },
        })
        .unwrap();

    let pong = sent_to(&actions, 1)
        .into_iter()
        .find_map(|m| match m {
            Message::Pong { timestamp, client_timestamp } => Some((timestamp, client_timestamp)),
            _ => None,
        })
        .expect("pong");
    assert!((pong.1 - 1.5).abs() < f64::EPSILON);
    assert!((pong.0 - 2.0).abs() < f64::EPSILON);
}

// Scenario: session sits idle past its TTL; the sweep tears it down,
// participants get a terminal error, and the code no longer resolves.
#[test]
fn ttl_sweep_expires_idle_session() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    let (_, code, _) = create_session(&mut d, 1);
    join_session(&mut d, 2, &code);

    env.advance(Duration::from_secs(3601));
    let actions = d.process_event(ServerEvent::Tick).unwrap();

    // Terminal error before the close, to both participants.
    for conn in [1u64, 2u64] {
        assert!(sent_to(&actions, conn)
            .iter()
            .any(|m| matches!(m, Message::Error { code, .. } if code == "session_expired")));
        assert_eq!(closes_for(&actions, conn), 1);
    }

    // The code is gone for new joiners.
    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 3,
            message: Message::SessionJoin { code, display_name: None },
        })
        .unwrap();
    assert!(sent_to(&actions, 3)
        .iter()
        .any(|m| matches!(m, Message::Error { code, .. } if code == "session_not_found")));
}

#[test]
fn activity_slides_the_ttl() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    let (_, code, _) = create_session(&mut d, 1);
    join_session(&mut d, 2, &code);

    // Chat keeps the session alive across what would have been expiry,
    // and also refreshes participant activity.
    for _ in 0..3 {
        env.advance(Duration::from_secs(1800));
        d.process_event(ServerEvent::MessageReceived {
            conn_id: 1,
            message: Message::ChatMessage {
                user_id: None,
                message: "still here".to_string(),
                timestamp: None,
            },
        })
        .unwrap();
        d.process_event(ServerEvent::MessageReceived {
            conn_id: 2,
            message: Message::Ping { timestamp: 0.0 },
        })
        .unwrap();
        d.process_event(ServerEvent::Tick).unwrap();
    }

    assert_eq!(d.session_count(), 1);
}

#[test]
fn inactive_participant_evicted_on_sweep() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    let (_, code, creator_id) = create_session(&mut d, 1);
    join_session(&mut d, 2, &code);

    // Only conn 2 stays active past the inactivity window.
    env.advance(Duration::from_secs(61));
    d.process_event(ServerEvent::MessageReceived {
        conn_id: 2,
        message: Message::Ping { timestamp: 0.0 },
    })
    .unwrap();
    let actions = d.process_event(ServerEvent::Tick).unwrap();

    assert!(sent_to(&actions, 2)
        .iter()
        .any(|m| matches!(m, Message::UserLeft { user_id, .. } if user_id == &creator_id)));
    assert_eq!(closes_for(&actions, 1), 1);
}

#[test]
fn last_disconnect_tears_session_down() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    let (_, code, _) = create_session(&mut d, 1);
    assert_eq!(d.session_count(), 1);

    d.process_event(ServerEvent::ConnectionClosed { conn_id: 1, reason: "eof".to_string() })
        .unwrap();

    // Closing grace elapses, the next sweep drops the session, and the
    // code no longer resolves.
    env.advance(Duration::from_secs(31));
    d.process_event(ServerEvent::Tick).unwrap();
    assert_eq!(d.session_count(), 0);

    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 2,
            message: Message::SessionJoin { code, display_name: None },
        })
        .unwrap();
    assert!(sent_to(&actions, 2)
        .iter()
        .any(|m| matches!(m, Message::Error { code, .. } if code == "session_not_found")));
}

#[test]
fn admin_cleanup_and_stats() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    let (_, code, _) = create_session(&mut d, 1);
    join_session(&mut d, 2, &code);
    create_session(&mut d, 3);

    let stats = d.session_stats();
    assert_eq!(stats.active_sessions, 2);
    assert_eq!(stats.anonymous_users, 3);
    assert_eq!(stats.session_timeout_secs, 3600);
    assert_eq!(stats.max_users_per_session, 10);

    env.advance(Duration::from_secs(3601));
    let (cleaned, _) = d.cleanup_expired_sessions();
    assert_eq!(cleaned, 2);
}

#[test]
fn unexpected_server_message_from_client_rejected() {
    let env = TestEnv::new();
    let mut d = driver(&env);
    create_session(&mut d, 1);

    let actions = d
        .process_event(ServerEvent::MessageReceived {
            conn_id: 1,
            message: Message::Pong { timestamp: 0.0, client_timestamp: 0.0 },
        })
        .unwrap();
    assert!(sent_to(&actions, 1)
        .iter()
        .any(|m| matches!(m, Message::Error { code, .. } if code == "unsupported_message")));
}
