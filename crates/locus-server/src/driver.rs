//! Server driver.
//!
//! Sans-IO orchestrator: transport tasks feed it [`ServerEvent`]s, it
//! returns [`ServerAction`]s for them to execute. Owns the share code
//! registry, every live session, and the connection index. One lock around
//! the whole driver is the concurrency model; everything in here is
//! synchronous and non-blocking.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use locus_core::{
    Environment, RegistryError, SessionError, SessionId,
    ident,
    membership::InactivityPolicy,
    registry::{RegistryConfig, SessionRegistry},
    session::{NewParticipant, Session, SessionAction, SessionConfig},
};
use locus_proto::{Message, SessionInfo, UserRef};

use crate::{error::ServerError, registry::ConnectionRegistry};

/// Log severity carried on [`ServerAction::Log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal lifecycle events.
    Info,
    /// Recoverable anomalies.
    Warn,
    /// Failures needing attention.
    Error,
}

/// Events fed into the driver by transport tasks.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A transport connection was accepted.
    ConnectionAccepted {
        /// Transport-assigned connection id.
        conn_id: u64,
    },

    /// A decoded message arrived on a connection.
    MessageReceived {
        /// Source connection.
        conn_id: u64,
        /// The decoded message.
        message: Message,
    },

    /// A connection dropped.
    ConnectionClosed {
        /// The closed connection.
        conn_id: u64,
        /// Close reason from the transport.
        reason: String,
    },

    /// Periodic maintenance timer.
    Tick,
}

/// Actions the driver asks transport tasks to execute.
#[derive(Debug, Clone)]
pub enum ServerAction {
    /// Encode and write a message to one connection.
    SendToConnection {
        /// Target connection.
        conn_id: u64,
        /// Message to deliver.
        message: Message,
    },

    /// Close a connection.
    CloseConnection {
        /// Target connection.
        conn_id: u64,
        /// Reason included in the close.
        reason: String,
    },

    /// Emit a log line.
    Log {
        /// Severity.
        level: LogLevel,
        /// Log line.
        message: String,
    },
}

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Share code registry settings (TTL, generation attempts).
    pub registry: RegistryConfig,
    /// Participant cap applied when a create request names none.
    pub default_max_players: u32,
    /// Spacing between expiry/inactivity sweeps.
    pub sweep_interval: Duration,
    /// Participant inactivity window.
    pub inactivity_window: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            default_max_players: 10,
            sweep_interval: Duration::from_secs(30),
            inactivity_window: Duration::from_secs(60),
        }
    }
}

/// Point-in-time operational counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Sessions currently live.
    pub active_sessions: usize,
    /// Anonymous participants across all sessions.
    pub anonymous_users: usize,
    /// Configured session TTL in seconds.
    pub session_timeout_secs: u64,
    /// Default participant cap.
    pub max_users_per_session: u32,
}

/// Sans-IO server orchestrator.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time/randomness
pub struct ServerDriver<E: Environment> {
    env: E,
    config: DriverConfig,
    registry: SessionRegistry,
    sessions: HashMap<SessionId, Session<E>>,
    connections: ConnectionRegistry,
    last_sweep: Option<Instant>,
}

impl<E: Environment> ServerDriver<E> {
    /// Create a driver with the given configuration.
    pub fn new(env: E, config: DriverConfig) -> Self {
        let registry = SessionRegistry::new(config.registry.clone());
        Self {
            env,
            config,
            registry,
            sessions: HashMap::new(),
            connections: ConnectionRegistry::new(),
            last_sweep: None,
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of bound connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Look up a live session by id.
    pub fn session(&self, session_id: &str) -> Option<&Session<E>> {
        self.sessions.get(session_id)
    }

    /// Process one event into actions.
    ///
    /// Per-message failures become `error` messages to the offending
    /// connection, not `Err`; the error path is reserved for conditions
    /// the transport layer must handle.
    ///
    /// # Errors
    ///
    /// Currently infallible in practice; the signature leaves room for
    /// transport-level failures.
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, ServerError> {
        match event {
            ServerEvent::ConnectionAccepted { conn_id } => Ok(vec![ServerAction::Log {
                level: LogLevel::Debug,
                message: format!("connection {conn_id} accepted"),
            }]),
            ServerEvent::MessageReceived { conn_id, message } => {
                Ok(self.handle_message(conn_id, message))
            },
            ServerEvent::ConnectionClosed { conn_id, reason } => {
                Ok(self.handle_closed(conn_id, &reason))
            },
            ServerEvent::Tick => Ok(self.handle_tick()),
        }
    }

    /// Force an expiry sweep outside the tick cadence. Returns the number
    /// of sessions torn down (admin surface).
    pub fn cleanup_expired_sessions(&mut self) -> (usize, Vec<ServerAction>) {
        let now = self.env.now();
        let expired = self.registry.expired_sessions(now);
        let count = expired.len();
        let mut actions = Vec::new();
        for session_id in expired {
            actions.extend(self.expire_session(&session_id));
        }
        self.registry.sweep(now);
        (count, actions)
    }

    /// Operational counters (admin surface).
    pub fn session_stats(&self) -> SessionStats {
        let anonymous_users = self
            .sessions
            .values()
            .flat_map(Session::participants)
            .filter(|p| p.is_anonymous)
            .count();
        SessionStats {
            active_sessions: self.sessions.len(),
            anonymous_users,
            session_timeout_secs: self.registry.session_ttl().as_secs(),
            max_users_per_session: self.config.default_max_players,
        }
    }

    fn handle_message(&mut self, conn_id: u64, message: Message) -> Vec<ServerAction> {
        if let Err(e) = message.validate() {
            return vec![
                log(LogLevel::Warn, format!("connection {conn_id}: invalid payload: {e}")),
                send_error(conn_id, "invalid_payload", &e.to_string()),
            ];
        }

        match message {
            Message::SessionCreate { display_name, colocalization_method, max_players } => {
                self.handle_create(conn_id, display_name, colocalization_method, max_players)
            },
            Message::SessionJoin { code, display_name } => {
                self.handle_join(conn_id, &code, display_name)
            },
            other => self.handle_session_message(conn_id, other),
        }
    }

    fn handle_create(
        &mut self,
        conn_id: u64,
        display_name: Option<String>,
        method: locus_proto::ColocalizationMethod,
        max_players: Option<u32>,
    ) -> Vec<ServerAction> {
        if self.connections.binding(conn_id).is_some() {
            return vec![send_error(conn_id, "already_in_session", "connection already in a session")];
        }

        let (session_id, share_code) = match self.registry.create(&self.env) {
            Ok(pair) => pair,
            Err(e @ RegistryError::CodeExhaustion { .. }) => {
                return vec![
                    log(LogLevel::Error, format!("share code allocation failed: {e}")),
                    send_error(conn_id, "service_unavailable", "could not allocate a share code"),
                ];
            },
            Err(e) => {
                return vec![
                    log(LogLevel::Error, format!("session create failed: {e}")),
                    send_error(conn_id, "internal_error", "session creation failed"),
                ];
            },
        };

        let max_participants = SessionConfig::clamp_max_participants(
            max_players.unwrap_or(self.config.default_max_players),
        );
        let session_config = SessionConfig {
            max_participants,
            colocalization_method: method,
            inactivity: InactivityPolicy { window: self.config.inactivity_window },
            ..SessionConfig::default()
        };
        let mut session = Session::new(
            self.env.clone(),
            session_id.clone(),
            share_code.as_str().to_string(),
            session_config,
        );

        let participant_id = ident::participant_id(&self.env);
        let display_name = display_name.unwrap_or_else(|| ident::display_name(&self.env));
        let creator = UserRef {
            id: participant_id.clone(),
            display_name: display_name.clone(),
            is_anonymous: true,
        };

        let Ok(join_actions) = session.join(NewParticipant {
            id: participant_id.clone(),
            display_name,
            is_anonymous: true,
        }) else {
            // A fresh session cannot refuse its creator.
            self.registry.remove_session(&session_id);
            return vec![send_error(conn_id, "internal_error", "session creation failed")];
        };
        let created_at = session.created_at();

        self.sessions.insert(session_id.clone(), session);
        self.connections.bind(conn_id, session_id.clone(), participant_id);

        let now = self.env.now();
        let expires_in = self.registry.expires_in(&session_id, now).unwrap_or(0);
        let mut actions = vec![
            log(
                LogLevel::Info,
                format!("session {session_id} created with code {}", share_code.as_str()),
            ),
            ServerAction::SendToConnection {
                conn_id,
                message: Message::SessionCreated {
                    session_id: session_id.clone(),
                    share_code: share_code.as_str().to_string(),
                    creator,
                    expires_in,
                    max_players: max_participants,
                    created_at,
                },
            },
        ];
        actions.extend(self.finish(&session_id, join_actions));
        actions
    }

    fn handle_join(
        &mut self,
        conn_id: u64,
        code: &str,
        display_name: Option<String>,
    ) -> Vec<ServerAction> {
        if self.connections.binding(conn_id).is_some() {
            return vec![send_error(conn_id, "already_in_session", "connection already in a session")];
        }

        let now = self.env.now();
        let session_id = match self.registry.resolve(code, now) {
            Ok(id) => id,
            Err(e) => {
                let (code, detail) = registry_error_code(&e);
                return vec![
                    log(LogLevel::Debug, format!("join rejected: {e}")),
                    send_error(conn_id, code, &detail),
                ];
            },
        };

        // Registry entry without a session means the session already closed.
        if !self.sessions.contains_key(&session_id) {
            self.registry.remove_session(&session_id);
            return vec![send_error(conn_id, "session_not_found", "session not found")];
        }

        let participant_id = ident::participant_id(&self.env);
        let display_name = display_name.unwrap_or_else(|| ident::display_name(&self.env));
        let user = UserRef {
            id: participant_id.clone(),
            display_name: display_name.clone(),
            is_anonymous: true,
        };

        let session = match self.sessions.get_mut(&session_id) {
            Some(s) => s,
            None => return vec![send_error(conn_id, "session_not_found", "session not found")],
        };
        let join_actions = match session.join(NewParticipant {
            id: participant_id.clone(),
            display_name,
            is_anonymous: true,
        }) {
            Ok(actions) => actions,
            Err(e) => {
                let (code, detail) = session_error_code(&e);
                return vec![
                    log(LogLevel::Debug, format!("join to {session_id} rejected: {e}")),
                    send_error(conn_id, code, &detail),
                ];
            },
        };

        let share_code = session.share_code().to_string();
        let max_players = session.max_participants();
        self.connections.bind(conn_id, session_id.clone(), participant_id);
        let expires_in = self.registry.expires_in(&session_id, now).unwrap_or(0);

        let mut actions = vec![
            log(LogLevel::Info, format!("participant joined session {session_id}")),
            ServerAction::SendToConnection {
                conn_id,
                message: Message::SessionJoined {
                    session_id: session_id.clone(),
                    user,
                    share_code,
                    session_info: SessionInfo { max_players, expires_in },
                },
            },
        ];
        actions.extend(self.finish(&session_id, join_actions));
        actions
    }

    /// Dispatch an in-session message to its session's state machine.
    fn handle_session_message(&mut self, conn_id: u64, message: Message) -> Vec<ServerAction> {
        let Some(binding) = self.connections.binding(conn_id).cloned() else {
            return vec![send_error(conn_id, "not_in_session", "join or create a session first")];
        };
        let session_id = binding.session_id;
        let participant_id = binding.participant_id;

        // Activity slides the session TTL.
        self.registry.touch(&session_id, self.env.now());

        let Some(session) = self.sessions.get_mut(&session_id) else {
            self.connections.unbind(conn_id);
            return vec![ServerAction::CloseConnection {
                conn_id,
                reason: "session gone".to_string(),
            }];
        };

        let result = match message {
            Message::PoseUpdate { pose, .. } => session.apply_pose_update(&participant_id, pose),
            Message::AnchorCreate { anchor_id, position, rotation, metadata, .. } => {
                session.create_anchor(&participant_id, anchor_id, position, rotation, metadata)
            },
            Message::AnchorUpdate { anchor_id, position, rotation, metadata, .. } => {
                session.update_anchor(&participant_id, &anchor_id, position, rotation, metadata)
            },
            Message::AnchorDelete { anchor_id, .. } => {
                session.delete_anchor(&participant_id, &anchor_id)
            },
            Message::ColocalizationData { colocalized, coordinate_system, method, .. } => {
                let mut combined = Vec::new();
                let mut result = Ok(());
                if let Some(frame) = coordinate_system {
                    match session.set_colocalization(&participant_id, frame, method) {
                        Ok(actions) => combined.extend(actions),
                        Err(e) => result = Err(e),
                    }
                }
                if result.is_ok() {
                    if let Some(colocalized) = colocalized {
                        match session.set_participant_colocalized(&participant_id, colocalized) {
                            Ok(actions) => combined.extend(actions),
                            Err(e) => result = Err(e),
                        }
                    }
                }
                result.map(|()| combined)
            },
            Message::ChatMessage { message, .. } => session.chat(&participant_id, message),
            Message::Ping { timestamp } => session.ping(&participant_id, timestamp),
            other => {
                return vec![
                    log(
                        LogLevel::Warn,
                        format!("connection {conn_id}: unexpected {} message", discriminator(&other)),
                    ),
                    send_error(conn_id, "unsupported_message", "message not accepted by server"),
                ];
            },
        };

        match result {
            Ok(session_actions) => self.finish(&session_id, session_actions),
            Err(e) => {
                let (code, detail) = session_error_code(&e);
                vec![
                    log(LogLevel::Debug, format!("session {session_id}: {e}")),
                    send_error(conn_id, code, &detail),
                ]
            },
        }
    }

    fn handle_closed(&mut self, conn_id: u64, reason: &str) -> Vec<ServerAction> {
        let Some(binding) = self.connections.unbind(conn_id) else {
            return vec![];
        };
        let mut actions =
            vec![log(LogLevel::Debug, format!("connection {conn_id} closed: {reason}"))];

        let Some(session) = self.sessions.get_mut(&binding.session_id) else {
            return actions;
        };
        match session.leave(&binding.participant_id) {
            Ok(session_actions) => {
                actions.extend(self.finish(&binding.session_id, session_actions));
            },
            Err(e) => {
                // Already evicted by a sweep; nothing to undo.
                actions.push(log(LogLevel::Debug, format!("leave after eviction: {e}")));
            },
        }
        actions
    }

    fn handle_tick(&mut self) -> Vec<ServerAction> {
        let now = self.env.now();
        let due = self
            .last_sweep
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.sweep_interval);
        if !due {
            return vec![];
        }
        self.last_sweep = Some(now);

        let mut actions = Vec::new();

        // TTL expiry first, then per-session inactivity maintenance.
        for session_id in self.registry.expired_sessions(now) {
            actions.extend(self.expire_session(&session_id));
        }
        self.registry.sweep(now);

        let session_ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for session_id in session_ids {
            let Some(session) = self.sessions.get_mut(&session_id) else { continue };
            let tick_actions = session.tick();
            actions.extend(self.finish(&session_id, tick_actions));
        }

        // Closed sessions are dropped for good here.
        self.sessions.retain(|session_id, session| {
            if session.is_closed() {
                tracing::debug!(session_id = %session_id, "dropping closed session");
                false
            } else {
                true
            }
        });

        actions
    }

    /// Terminate one session because its TTL ran out.
    fn expire_session(&mut self, session_id: &str) -> Vec<ServerAction> {
        let Some(session) = self.sessions.get_mut(session_id) else {
            self.registry.remove_session(session_id);
            return vec![];
        };
        let session_actions = session.terminate("session expired");
        let mut actions =
            vec![log(LogLevel::Info, format!("session {session_id} expired"))];
        actions.extend(self.finish(session_id, session_actions));
        actions
    }

    /// Translate session actions into server actions and apply their
    /// side effects on the connection and code registries.
    ///
    /// `Terminated` tears the session's registry entry down and closes
    /// every remaining connection; `user_left` events for evicted
    /// participants close the matching socket.
    fn finish(&mut self, session_id: &str, session_actions: Vec<SessionAction>) -> Vec<ServerAction> {
        let mut actions = Vec::new();
        let mut close: Vec<(u64, String)> = Vec::new();
        let mut terminated: Option<String> = None;

        {
            let Some(session) = self.sessions.get(session_id) else {
                return actions;
            };
            let conns = self.connections.connections_in(session_id);

            for session_action in session_actions {
                match session_action {
                    SessionAction::Broadcast { message, exclude, colocalized_only } => {
                        // Sockets whose participant was just evicted get closed
                        // instead of the departure broadcast.
                        if let Message::UserLeft { ref user_id, .. } = message {
                            if let Some(conn_id) = self.connections.conn_for(session_id, user_id) {
                                close.push((conn_id, "removed from session".to_string()));
                            }
                        }
                        for (conn_id, participant_id) in &conns {
                            if exclude.as_deref() == Some(participant_id.as_str()) {
                                continue;
                            }
                            let Some(participant) = session.participant(participant_id) else {
                                continue;
                            };
                            if colocalized_only && !participant.colocalized {
                                continue;
                            }
                            actions.push(ServerAction::SendToConnection {
                                conn_id: *conn_id,
                                message: message.clone(),
                            });
                        }
                    },
                    SessionAction::SendTo { participant_id, message } => {
                        if let Some(conn_id) = self.connections.conn_for(session_id, &participant_id)
                        {
                            actions.push(ServerAction::SendToConnection { conn_id, message });
                        } else {
                            actions.push(log(
                                LogLevel::Debug,
                                format!("participant {participant_id} offline, message dropped"),
                            ));
                        }
                    },
                    SessionAction::Terminated { reason } => {
                        terminated = Some(reason);
                    },
                }
            }

            if let Some(reason) = &terminated {
                for (conn_id, _) in &conns {
                    close.push((*conn_id, reason.clone()));
                }
            }
        }

        if let Some(reason) = terminated {
            self.registry.remove_session(session_id);
            actions.push(log(
                LogLevel::Info,
                format!("session {session_id} terminated: {reason}"),
            ));
        }
        for (conn_id, reason) in close {
            self.connections.unbind(conn_id);
            actions.push(ServerAction::CloseConnection { conn_id, reason });
        }

        actions
    }
}

fn log(level: LogLevel, message: String) -> ServerAction {
    ServerAction::Log { level, message }
}

fn send_error(conn_id: u64, code: &str, message: &str) -> ServerAction {
    ServerAction::SendToConnection {
        conn_id,
        message: Message::Error { code: code.to_string(), message: message.to_string() },
    }
}

fn registry_error_code(err: &RegistryError) -> (&'static str, String) {
    match err {
        RegistryError::InvalidFormat { .. } => {
            ("invalid_code_format", "share codes are three letters then three digits".to_string())
        },
        RegistryError::NotFound { .. } => ("session_not_found", "no session with that code".to_string()),
        RegistryError::Expired { .. } => ("session_expired", "session expired".to_string()),
        RegistryError::CodeExhaustion { .. } => {
            ("service_unavailable", "could not allocate a share code".to_string())
        },
    }
}

fn session_error_code(err: &SessionError) -> (&'static str, String) {
    match err {
        SessionError::SessionFull { max } => {
            ("session_full", format!("session is full ({max} participants)"))
        },
        SessionError::SessionExpired => ("session_expired", "session expired".to_string()),
        SessionError::UnknownParticipant { .. } => {
            ("not_in_session", "participant not in session".to_string())
        },
        SessionError::UnknownAnchor { anchor_id } => {
            ("anchor_not_found", format!("no anchor {anchor_id}"))
        },
    }
}

/// Wire discriminator for log lines.
fn discriminator(message: &Message) -> &'static str {
    match message {
        Message::SessionCreate { .. } => "session_create",
        Message::SessionCreated { .. } => "session_created",
        Message::SessionJoin { .. } => "session_join",
        Message::SessionJoined { .. } => "session_joined",
        Message::PoseUpdate { .. } => "pose_update",
        Message::AnchorCreate { .. } => "anchor_create",
        Message::AnchorUpdate { .. } => "anchor_update",
        Message::AnchorDelete { .. } => "anchor_delete",
        Message::ColocalizationData { .. } => "colocalization_data",
        Message::CoordinateSystem { .. } => "coordinate_system",
        Message::UserJoined { .. } => "user_joined",
        Message::UserLeft { .. } => "user_left",
        Message::HostChanged { .. } => "host_changed",
        Message::ChatMessage { .. } => "chat_message",
        Message::Ping { .. } => "ping",
        Message::Pong { .. } => "pong",
        Message::SessionState { .. } => "session_state",
        Message::Error { .. } => "error",
    }
}
