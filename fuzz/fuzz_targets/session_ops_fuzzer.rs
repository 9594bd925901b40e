//! Fuzz target for the session state machine.
//!
//! # Strategy
//!
//! - Arbitrary sequences of joins, leaves, anchor mutations, pose and
//!   colocalization traffic, and clock advances
//! - Ids reference participants by index so operations stay meaningful
//!   and frequently collide
//!
//! # Invariants
//!
//! - NEVER panic on any operation sequence
//! - Exactly one host while participants are present, drawn from the roster
//! - Closed sessions hold no participants and accept no joins
//! - Anchors are deleted only by their creator or the host

#![no_main]

use std::collections::BTreeMap;
use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use locus_core::{NewParticipant, Session, SessionConfig, SessionError};
use locus_harness::SimEnv;
use locus_proto::{CoordinateSystem, Pose, Quat, TrackingState, Vec3};

#[derive(Debug, Clone, Arbitrary)]
enum SessionEvent {
    Join,
    Leave { member: u8 },
    CreateAnchor { member: u8, slot: u8 },
    DeleteAnchor { member: u8, slot: u8 },
    PoseUpdate { member: u8, x: i16, colocalized: bool },
    SetFrame { member: u8 },
    Chat { member: u8, len: u8 },
    Tick { advance_secs: u8 },
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    seed: u64,
    max_participants: u8,
    events: Vec<SessionEvent>,
}

fuzz_target!(|input: FuzzInput| {
    let env = SimEnv::with_seed(input.seed);
    let config = SessionConfig {
        max_participants: SessionConfig::clamp_max_participants(u32::from(input.max_participants)),
        ..SessionConfig::default()
    };
    let mut session = Session::new(
        env.clone(),
        "fuzz-session".to_string(),
        "FUZ000".to_string(),
        config,
    );

    let mut members: Vec<String> = Vec::new();
    let mut next_member = 0u32;

    for event in input.events {
        env.advance(Duration::from_millis(1));

        match event {
            SessionEvent::Join => {
                let id = format!("u{next_member}");
                let result = session.join(NewParticipant {
                    id: id.clone(),
                    display_name: format!("Fuzzer {next_member}"),
                    is_anonymous: true,
                });
                match result {
                    Ok(_) => {
                        next_member += 1;
                        members.push(id);
                    },
                    Err(SessionError::SessionFull { .. } | SessionError::SessionExpired) => {},
                    Err(e) => panic!("unexpected join error: {e}"),
                }
            },

            SessionEvent::Leave { member } => {
                if let Some(id) = pick(&members, member) {
                    let _ = session.leave(&id);
                }
            },

            SessionEvent::CreateAnchor { member, slot } => {
                if let Some(id) = pick(&members, member) {
                    let _ = session.create_anchor(
                        &id,
                        Some(format!("slot_{}", slot % 8)),
                        Vec3::new(f64::from(slot), 0.0, 0.0),
                        Quat::IDENTITY,
                        BTreeMap::new(),
                    );
                }
            },

            SessionEvent::DeleteAnchor { member, slot } => {
                if let Some(id) = pick(&members, member) {
                    let creator = session
                        .anchor(&format!("slot_{}", slot % 8))
                        .map(|a| a.creator_id.clone());
                    let was_host = session.host_id() == Some(id.as_str());
                    let _ = session.delete_anchor(&id, &format!("slot_{}", slot % 8));

                    // Unauthorized deletes must leave the anchor alone.
                    if let Some(creator) = creator {
                        let survived = session.anchor(&format!("slot_{}", slot % 8)).is_some();
                        let authorized = creator == id || was_host;
                        assert_eq!(survived, !authorized);
                    }
                }
            },

            SessionEvent::PoseUpdate { member, x, colocalized } => {
                if let Some(id) = pick(&members, member) {
                    let _ = session.set_participant_colocalized(&id, colocalized);
                    let pose = Pose {
                        position: Vec3::new(f64::from(x), 0.0, 0.0),
                        rotation: Quat::IDENTITY,
                        confidence: 1.0,
                        tracking_state: TrackingState::Tracking,
                        timestamp: 0.0,
                    };
                    let _ = session.apply_pose_update(&id, pose);
                }
            },

            SessionEvent::SetFrame { member } => {
                if let Some(id) = pick(&members, member) {
                    let _ = session.set_colocalization(&id, CoordinateSystem::default(), None);
                }
            },

            SessionEvent::Chat { member, len } => {
                if let Some(id) = pick(&members, member) {
                    let _ = session.chat(&id, "m".repeat(usize::from(len)));
                }
            },

            SessionEvent::Tick { advance_secs } => {
                env.advance(Duration::from_secs(u64::from(advance_secs % 120)));
                let _ = session.tick();
            },
        }

        // The machine may evict members on its own (inactivity, teardown).
        members.retain(|id| session.participant(id).is_some());

        assert!(session.host_invariant_holds());
        assert_eq!(session.participant_count(), members.len());
        if session.is_closed() {
            assert_eq!(session.participant_count(), 0);
        }
    }
});

fn pick(members: &[String], index: u8) -> Option<String> {
    if members.is_empty() {
        None
    } else {
        Some(members[usize::from(index) % members.len()].clone())
    }
}
