//! Opaque identifier generation.
//!
//! All ids are minted from the [`Environment`]'s RNG so they stay
//! deterministic under simulation. Formats follow the wire protocol:
//! 16 hex chars for sessions, `anon_` + 12 hex for participants,
//! `anch_` + 12 hex for server-minted anchors.

use crate::env::Environment;

/// Session identifier (opaque, server-generated).
pub type SessionId = String;

/// Session-scoped participant identifier.
pub type ParticipantId = String;

fn hex_string(env: &impl Environment, chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    let mut bytes = vec![0u8; chars.div_ceil(2)];
    env.random_bytes(&mut bytes);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(chars);
    out
}

/// Mint a new session id.
pub fn session_id(env: &impl Environment) -> SessionId {
    hex_string(env, 16)
}

/// Mint a new anonymous participant id.
pub fn participant_id(env: &impl Environment) -> ParticipantId {
    format!("anon_{}", hex_string(env, 12))
}

/// Mint a new server-side anchor id.
pub fn anchor_id(env: &impl Environment) -> String {
    format!("anch_{}", hex_string(env, 12))
}

/// Default display name for participants who did not supply one.
pub fn display_name(env: &impl Environment) -> String {
    let n = 1000 + env.random_u64() % 9000;
    format!("Player_{n}")
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[derive(Clone)]
    struct FixedEnv;

    impl Environment for FixedEnv {
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn unix_time(&self) -> f64 {
            0.0
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            std::future::ready(())
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = 0xA0 | (i as u8 & 0x0F);
            }
        }
    }

    #[test]
    fn id_formats() {
        let env = FixedEnv;
        let sid = session_id(&env);
        assert_eq!(sid.len(), 16);
        assert!(sid.chars().all(|c| c.is_ascii_hexdigit()));

        let pid = participant_id(&env);
        assert!(pid.starts_with("anon_"));
        assert_eq!(pid.len(), 5 + 12);

        let aid = anchor_id(&env);
        assert!(aid.starts_with("anch_"));
    }

    #[test]
    fn display_name_in_range() {
        let name = display_name(&FixedEnv);
        let n: u64 = name.strip_prefix("Player_").and_then(|s| s.parse().ok()).unwrap_or(0);
        assert!((1000..10000).contains(&n), "got {name}");
    }
}
