//! Session registry: share-code allocation and resolution.
//!
//! Codes are a scarce, human-typed namespace (26^3 * 10^3, about 17.6M
//! combinations). Collisions are unlikely but handled defensively with a
//! bounded retry count so a nearly-full namespace cannot spin forever.
//!
//! Expiry is sliding: every successful resolve or explicit touch pushes a
//! session's deadline out by the configured TTL. Eviction is both lazy
//! (a resolve of a dead code removes it) and periodic ([`SessionRegistry::sweep`]).

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::{
    env::Environment,
    error::RegistryError,
    ident::{self, SessionId},
};

/// Share-code format: 3 uppercase letters followed by 3 digits.
const CODE_LETTERS: usize = 3;
const CODE_DIGITS: usize = 3;

/// A validated human-shareable session code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShareCode(String);

impl ShareCode {
    /// Parse and normalize user input.
    ///
    /// Lowercase letters are accepted and normalized to uppercase, matching
    /// what people actually type.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidFormat`] unless the input matches
    /// `^[A-Za-z]{3}[0-9]{3}$`.
    pub fn parse(input: &str) -> Result<Self, RegistryError> {
        let invalid = || RegistryError::InvalidFormat { code: input.to_string() };

        if input.len() != CODE_LETTERS + CODE_DIGITS {
            return Err(invalid());
        }
        let (letters, digits) = input.split_at(CODE_LETTERS);
        if !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid());
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        Ok(Self(format!("{}{digits}", letters.to_ascii_uppercase())))
    }

    /// Generate a random code (`ABC123` shape) from the environment's RNG.
    pub fn generate(env: &impl Environment) -> Self {
        let mut code = String::with_capacity(CODE_LETTERS + CODE_DIGITS);
        for _ in 0..CODE_LETTERS {
            let c = b'A' + (env.random_u64() % 26) as u8;
            code.push(char::from(c));
        }
        for _ in 0..CODE_DIGITS {
            let d = b'0' + (env.random_u64() % 10) as u8;
            code.push(char::from(d));
        }
        Self(code)
    }

    /// The normalized code text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShareCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry tuning knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Sliding session TTL.
    pub session_ttl: Duration,
    /// Bounded code-generation retry count.
    pub max_generation_attempts: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { session_ttl: Duration::from_secs(3600), max_generation_attempts: 10 }
    }
}

#[derive(Debug, Clone)]
struct CodeEntry {
    session_id: SessionId,
    expires_at: Instant,
}

/// Maps share codes to session ids and owns session expiry.
///
/// An injected, caller-locked store: the server wraps it (together with the
/// sessions it points at) in one lock, so sweeps never race an in-flight
/// join. Unit tests construct independent instances.
#[derive(Debug)]
pub struct SessionRegistry {
    config: RegistryConfig,
    codes: HashMap<String, CodeEntry>,
    by_session: HashMap<SessionId, String>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self { config, codes: HashMap::new(), by_session: HashMap::new() }
    }

    /// Configured sliding TTL.
    pub fn session_ttl(&self) -> Duration {
        self.config.session_ttl
    }

    /// Number of live (possibly expired but unswept) code mappings.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// True if no codes are allocated.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Allocate a session: mints a session id and a unique share code.
    ///
    /// Generation retries on collision with a live code, up to the bounded
    /// attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CodeExhaustion`] if every attempt collided.
    pub fn create(&mut self, env: &impl Environment) -> Result<(SessionId, ShareCode), RegistryError> {
        let now = env.now();

        for _ in 0..self.config.max_generation_attempts {
            let code = ShareCode::generate(env);
            if let Some(entry) = self.codes.get(code.as_str()) {
                // An expired mapping may be reclaimed immediately.
                if entry.expires_at > now {
                    continue;
                }
                let stale = entry.session_id.clone();
                self.evict(&stale);
            }

            let session_id = ident::session_id(env);
            let entry = CodeEntry {
                session_id: session_id.clone(),
                expires_at: now + self.config.session_ttl,
            };
            self.codes.insert(code.as_str().to_string(), entry);
            self.by_session.insert(session_id.clone(), code.as_str().to_string());

            tracing::info!(code = %code, session_id = %session_id, "allocated session");
            return Ok((session_id, code));
        }

        tracing::error!(
            attempts = self.config.max_generation_attempts,
            "share-code generation exhausted"
        );
        Err(RegistryError::CodeExhaustion { attempts: self.config.max_generation_attempts })
    }

    /// Resolve a code to its session id, sliding the expiry forward.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidFormat`] for malformed input.
    /// - [`RegistryError::NotFound`] for unallocated codes (including codes
    ///   removed by a concurrent sweep).
    /// - [`RegistryError::Expired`] for codes past their deadline; the dead
    ///   mapping is evicted as a side effect.
    pub fn resolve(&mut self, input: &str, now: Instant) -> Result<SessionId, RegistryError> {
        let code = ShareCode::parse(input)?;

        let Some(entry) = self.codes.get_mut(code.as_str()) else {
            return Err(RegistryError::NotFound { code: code.as_str().to_string() });
        };

        if entry.expires_at <= now {
            let stale = entry.session_id.clone();
            self.evict(&stale);
            return Err(RegistryError::Expired { code: code.as_str().to_string() });
        }

        entry.expires_at = now + self.config.session_ttl;
        Ok(entry.session_id.clone())
    }

    /// Slide a session's expiry forward on activity.
    pub fn touch(&mut self, session_id: &str, now: Instant) {
        if let Some(code) = self.by_session.get(session_id) {
            if let Some(entry) = self.codes.get_mut(code) {
                entry.expires_at = now + self.config.session_ttl;
            }
        }
    }

    /// Seconds until a session expires, for `expires_in` response fields.
    pub fn expires_in(&self, session_id: &str, now: Instant) -> Option<u64> {
        let code = self.by_session.get(session_id)?;
        let entry = self.codes.get(code)?;
        Some(entry.expires_at.saturating_duration_since(now).as_secs())
    }

    /// True if the session's deadline has passed.
    pub fn is_expired(&self, session_id: &str, now: Instant) -> bool {
        self.expires_in(session_id, now).is_none_or(|secs| secs == 0)
    }

    /// Session ids whose deadline has passed (not yet evicted).
    pub fn expired_sessions(&self, now: Instant) -> Vec<SessionId> {
        self.codes
            .values()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| entry.session_id.clone())
            .collect()
    }

    /// Remove a session's code mapping (explicit teardown).
    pub fn remove_session(&mut self, session_id: &str) {
        self.evict(session_id);
    }

    /// Remove every expired mapping. Returns the count removed.
    ///
    /// Idempotent; safe to run on a timer while resolves are happening
    /// under the same lock.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let dead: Vec<SessionId> = self.expired_sessions(now);
        for session_id in &dead {
            self.evict(session_id);
        }
        if !dead.is_empty() {
            tracing::info!(removed = dead.len(), "registry sweep evicted expired sessions");
        }
        dead.len()
    }

    fn evict(&mut self, session_id: &str) {
        if let Some(code) = self.by_session.remove(session_id) {
            self.codes.remove(&code);
        }
    }
}
