//! Client state machine.
//!
//! The `Client` is the top-level reconciliation agent: it owns the local
//! mirror of session state (peers, anchors, shared frame), throttles
//! outbound poses, tracks link quality, and drives reconnection. Pure state
//! machine; the caller performs all socket I/O.

use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant},
};

use locus_core::{Environment, registry::ShareCode};
use locus_proto::{
    Anchor, ColocalizationMethod, CoordinateSystem, Message, Pose,
};

use crate::{
    error::ClientError,
    event::{ClientAction, ClientEvent},
    pose_filter::{PoseFilter, PoseFilterConfig},
    prediction::{PoseHistory, PredictionConfig},
    quality::{AdaptiveRate, LinkQuality, QualityMonitor},
};

/// Tunables for the reconciliation agent.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Outbound pose gate thresholds.
    pub pose_filter: PoseFilterConfig,
    /// Remote pose extrapolation bounds.
    pub prediction: PredictionConfig,
    /// Spacing between keep-alive pings.
    pub ping_interval: Duration,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Base reconnect backoff; doubles per attempt.
    pub reconnect_backoff: Duration,
    /// Cap on the backoff growth.
    pub max_reconnect_backoff: Duration,
    /// Quality must hold Good-or-better this long before the pose rate is
    /// restored.
    pub rate_hold_down: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            pose_filter: PoseFilterConfig::default(),
            prediction: PredictionConfig::default(),
            ping_interval: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            reconnect_backoff: Duration::from_secs(1),
            max_reconnect_backoff: Duration::from_secs(30),
            rate_hold_down: Duration::from_secs(10),
        }
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport, no session.
    Disconnected,
    /// Transport being established or session handshake in flight.
    Connecting,
    /// Session active.
    Connected,
    /// Transport lost; retrying.
    Reconnecting {
        /// 1-based attempt counter.
        attempt: u32,
    },
}

/// What to ask the server for once the transport opens.
#[derive(Debug, Clone)]
enum SessionIntent {
    Create {
        display_name: Option<String>,
        method: ColocalizationMethod,
        max_players: Option<u32>,
    },
    Join {
        code: String,
        display_name: Option<String>,
    },
}

/// Local view of the active session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Server-assigned session id.
    pub session_id: String,
    /// Share code for inviting peers.
    pub share_code: String,
    /// Our participant id.
    pub user_id: String,
    /// Whether we currently hold host authority.
    pub is_host: bool,
}

/// Mirror of one remote participant.
#[derive(Debug)]
struct Peer {
    display_name: String,
    is_host: bool,
    colocalized: bool,
    history: PoseHistory,
}

/// Client reconciliation agent.
///
/// Pure state machine - returns actions, caller handles I/O.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time/randomness
pub struct Client<E: Environment> {
    config: ReconcilerConfig,
    state: ConnectionState,
    intent: Option<SessionIntent>,
    session: Option<SessionHandle>,
    awaiting_snapshot: bool,
    peers: HashMap<String, Peer>,
    anchors: BTreeMap<String, Anchor>,
    coordinate_system: Option<CoordinateSystem>,
    colocalized: bool,
    quality: QualityMonitor,
    rate: AdaptiveRate,
    pose_filter: PoseFilter,
    last_ping: Option<Instant>,
    env: E,
}

impl<E: Environment> Client<E> {
    /// Create an idle client.
    pub fn new(env: E, config: ReconcilerConfig) -> Self {
        let rate = AdaptiveRate::new(config.pose_filter.interval, config.rate_hold_down);
        let pose_filter = PoseFilter::new(config.pose_filter.clone());
        Self {
            config,
            state: ConnectionState::Disconnected,
            intent: None,
            session: None,
            awaiting_snapshot: false,
            peers: HashMap::new(),
            anchors: BTreeMap::new(),
            coordinate_system: None,
            colocalized: false,
            quality: QualityMonitor::new(),
            rate,
            pose_filter,
            last_ping: None,
            env,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Active session, once established.
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Number of known remote participants.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Mirrored anchor set.
    pub fn anchors(&self) -> &BTreeMap<String, Anchor> {
        &self.anchors
    }

    /// The shared frame, once established.
    pub fn coordinate_system(&self) -> Option<&CoordinateSystem> {
        self.coordinate_system.as_ref()
    }

    /// Smoothed RTT estimate in milliseconds.
    pub fn rtt_ms(&self) -> Option<f64> {
        self.quality.rtt_ms()
    }

    /// Current link quality tier.
    pub fn link_quality(&self) -> LinkQuality {
        self.quality.quality()
    }

    /// Best estimate of a peer's pose right now, extrapolated when stale.
    pub fn peer_pose(&self, user_id: &str) -> Option<Pose> {
        self.peers.get(user_id)?.history.sample(self.env.now(), &self.config.prediction)
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if the event cannot be processed; check
    /// [`ClientError::is_fatal`] before tearing the agent down.
    pub fn handle(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::CreateSession { display_name, method, max_players } => {
                self.handle_connect(SessionIntent::Create { display_name, method, max_players })
            },
            ClientEvent::JoinSession { code, display_name } => {
                let code = ShareCode::parse(&code)
                    .map_err(|_| ClientError::InvalidShareCode { code })?;
                self.handle_connect(SessionIntent::Join {
                    code: code.as_str().to_string(),
                    display_name,
                })
            },
            ClientEvent::TransportConnected => self.handle_transport_connected(),
            ClientEvent::TransportClosed { reason } => Ok(self.handle_transport_closed(&reason)),
            ClientEvent::MessageReceived(message) => self.handle_message(message),
            ClientEvent::LocalPose { pose } => self.handle_local_pose(pose),
            ClientEvent::CreateAnchor { position, rotation, metadata } => {
                self.require_connected()?;
                Ok(vec![ClientAction::Send(Message::AnchorCreate {
                    anchor_id: None,
                    position,
                    rotation,
                    metadata,
                    creator_id: None,
                    created_at: None,
                })])
            },
            ClientEvent::UpdateAnchor { anchor_id, position, rotation, metadata } => {
                self.require_connected()?;
                Ok(vec![ClientAction::Send(Message::AnchorUpdate {
                    anchor_id,
                    position,
                    rotation,
                    metadata,
                    timestamp: None,
                })])
            },
            ClientEvent::DeleteAnchor { anchor_id } => {
                self.require_connected()?;
                Ok(vec![ClientAction::Send(Message::AnchorDelete { anchor_id, timestamp: None })])
            },
            ClientEvent::SetColocalized { colocalized } => {
                self.require_connected()?;
                self.colocalized = colocalized;
                Ok(vec![ClientAction::Send(Message::ColocalizationData {
                    user_id: None,
                    colocalized: Some(colocalized),
                    coordinate_system: None,
                    method: None,
                })])
            },
            ClientEvent::SetCoordinateSystem { coordinate_system, method } => {
                self.require_connected()?;
                Ok(vec![ClientAction::Send(Message::ColocalizationData {
                    user_id: None,
                    colocalized: None,
                    coordinate_system: Some(coordinate_system),
                    method: Some(method),
                })])
            },
            ClientEvent::Chat { message } => {
                self.require_connected()?;
                Ok(vec![ClientAction::Send(Message::ChatMessage {
                    user_id: None,
                    message,
                    timestamp: None,
                })])
            },
            ClientEvent::Tick => Ok(self.handle_tick()),
        }
    }

    fn require_connected(&self) -> Result<(), ClientError> {
        if self.state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn handle_connect(&mut self, intent: SessionIntent) -> Result<Vec<ClientAction>, ClientError> {
        match &self.state {
            ConnectionState::Disconnected => {},
            _ => {
                if let Some(session) = &self.session {
                    return Err(ClientError::AlreadyConnected {
                        session_id: session.session_id.clone(),
                    });
                }
                return Err(ClientError::InvalidState {
                    reason: "connect already in progress".to_string(),
                });
            },
        }

        self.intent = Some(intent);
        self.state = ConnectionState::Connecting;
        Ok(vec![ClientAction::Dial { delay: Duration::ZERO }])
    }

    /// Transport is up: send the session request for the current intent.
    /// After a reconnect the intent is a rejoin by the stored share code.
    fn handle_transport_connected(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        if !matches!(self.state, ConnectionState::Connecting | ConnectionState::Reconnecting { .. })
        {
            return Err(ClientError::InvalidState {
                reason: "transport connected while not dialing".to_string(),
            });
        }

        let request = match self.intent.as_ref() {
            Some(SessionIntent::Create { display_name, method, max_players }) => {
                Message::SessionCreate {
                    display_name: display_name.clone(),
                    colocalization_method: *method,
                    max_players: *max_players,
                }
            },
            Some(SessionIntent::Join { code, display_name }) => Message::SessionJoin {
                code: code.clone(),
                display_name: display_name.clone(),
            },
            None => {
                return Err(ClientError::InvalidState {
                    reason: "transport connected with no session intent".to_string(),
                });
            },
        };

        Ok(vec![ClientAction::Send(request)])
    }

    /// Transport dropped: retry with backoff while we have a session to
    /// return to and attempts remain, otherwise surface terminal failure.
    fn handle_transport_closed(&mut self, reason: &str) -> Vec<ClientAction> {
        if self.state == ConnectionState::Disconnected {
            return vec![];
        }

        let attempt = match &self.state {
            ConnectionState::Reconnecting { attempt } => attempt + 1,
            _ => 1,
        };

        // Rejoin by the stored share code if a session was ever established.
        if let Some(session) = &self.session {
            self.intent = Some(SessionIntent::Join {
                code: session.share_code.clone(),
                display_name: None,
            });
        }

        if attempt > self.config.max_reconnect_attempts {
            let attempts = self.config.max_reconnect_attempts;
            self.reset_to_disconnected();
            return vec![
                ClientAction::Log {
                    message: format!("giving up after {attempts} reconnect attempts"),
                },
                ClientAction::Terminated {
                    reason: format!("connection failed after {attempts} attempts"),
                },
            ];
        }

        // Stale mirror state is worthless across a gap; clear it and wait
        // for the post-rejoin snapshot.
        self.clear_caches();
        self.awaiting_snapshot = true;
        self.state = ConnectionState::Reconnecting { attempt };

        let delay = self.backoff_for(attempt);
        vec![
            ClientAction::Log {
                message: format!("transport closed ({reason}); reconnect attempt {attempt}"),
            },
            ClientAction::Dial { delay },
        ]
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(10);
        let delay = self.config.reconnect_backoff.saturating_mul(1 << shift);
        delay.min(self.config.max_reconnect_backoff)
    }

    fn handle_message(&mut self, message: Message) -> Result<Vec<ClientAction>, ClientError> {
        match message {
            Message::SessionCreated { session_id, share_code, creator, .. } => {
                self.state = ConnectionState::Connected;
                self.awaiting_snapshot = false;
                let handle = SessionHandle {
                    session_id: session_id.clone(),
                    share_code: share_code.clone(),
                    user_id: creator.id.clone(),
                    is_host: true,
                };
                self.session = Some(handle);
                Ok(vec![
                    ClientAction::Log { message: format!("created session {session_id}") },
                    ClientAction::SessionEstablished {
                        session_id,
                        share_code,
                        user_id: creator.id,
                    },
                ])
            },

            Message::SessionJoined { session_id, user, share_code, .. } => {
                self.state = ConnectionState::Connected;
                // Deltas are dropped until the snapshot lands.
                self.awaiting_snapshot = true;
                let handle = SessionHandle {
                    session_id: session_id.clone(),
                    share_code: share_code.clone(),
                    user_id: user.id.clone(),
                    is_host: false,
                };
                self.session = Some(handle);
                Ok(vec![
                    ClientAction::Log { message: format!("joined session {session_id}") },
                    ClientAction::SessionEstablished { session_id, share_code, user_id: user.id },
                ])
            },

            Message::SessionState { coordinate_system, anchors, participants, .. } => {
                self.awaiting_snapshot = false;
                self.coordinate_system = coordinate_system;
                self.anchors = anchors;
                self.peers.clear();
                let our_id = self.session.as_ref().map(|s| s.user_id.clone());
                for (id, info) in participants {
                    if Some(&id) == our_id.as_ref() {
                        if let Some(session) = self.session.as_mut() {
                            session.is_host = info.is_host;
                        }
                        continue;
                    }
                    self.peers.insert(id, Peer {
                        display_name: info.display_name,
                        is_host: info.is_host,
                        colocalized: info.colocalized,
                        history: PoseHistory::new(),
                    });
                }
                Ok(vec![])
            },

            Message::PoseUpdate { user_id: Some(user_id), pose } => {
                if self.awaiting_snapshot {
                    return Ok(vec![]);
                }
                let now = self.env.now();
                if let Some(peer) = self.peers.get_mut(&user_id) {
                    peer.history.push(pose, now);
                }
                Ok(vec![])
            },
            // A pose delta without a sender is malformed; drop it.
            Message::PoseUpdate { user_id: None, .. } => Ok(vec![]),

            Message::UserJoined { user_id, display_name, is_host, .. } => {
                if self.awaiting_snapshot {
                    return Ok(vec![]);
                }
                self.peers.insert(user_id.clone(), Peer {
                    display_name,
                    is_host,
                    colocalized: false,
                    history: PoseHistory::new(),
                });
                Ok(vec![ClientAction::Log { message: format!("{user_id} joined") }])
            },

            Message::UserLeft { user_id, .. } => {
                self.peers.remove(&user_id);
                Ok(vec![ClientAction::Log { message: format!("{user_id} left") }])
            },

            Message::HostChanged { user_id, .. } => {
                for (id, peer) in &mut self.peers {
                    peer.is_host = *id == user_id;
                }
                if let Some(session) = self.session.as_mut() {
                    session.is_host = session.user_id == user_id;
                }
                Ok(vec![ClientAction::Log { message: format!("host is now {user_id}") }])
            },

            Message::AnchorCreate {
                anchor_id: Some(id),
                position,
                rotation,
                metadata,
                creator_id: Some(creator_id),
                created_at,
            } => {
                if self.awaiting_snapshot {
                    return Ok(vec![]);
                }
                let at = created_at.unwrap_or_default();
                self.anchors.insert(id.clone(), Anchor {
                    id,
                    creator_id,
                    position,
                    rotation,
                    metadata,
                    created_at: at,
                    updated_at: at,
                });
                Ok(vec![])
            },
            // Create without server-filled fields is malformed; drop it.
            Message::AnchorCreate { .. } => Ok(vec![]),

            Message::AnchorUpdate { anchor_id, position, rotation, metadata, timestamp } => {
                if let Some(anchor) = self.anchors.get_mut(&anchor_id) {
                    if let Some(position) = position {
                        anchor.position = position;
                    }
                    if let Some(rotation) = rotation {
                        anchor.rotation = rotation;
                    }
                    if let Some(metadata) = metadata {
                        anchor.metadata = metadata;
                    }
                    if let Some(at) = timestamp {
                        anchor.updated_at = at;
                    }
                }
                Ok(vec![])
            },

            Message::AnchorDelete { anchor_id, .. } => {
                self.anchors.remove(&anchor_id);
                Ok(vec![])
            },

            Message::CoordinateSystem { coordinate_system, .. } => {
                self.coordinate_system = Some(coordinate_system);
                Ok(vec![ClientAction::Log {
                    message: "shared coordinate frame established".to_string(),
                }])
            },

            Message::ColocalizationData { user_id: Some(user_id), colocalized, .. } => {
                if let (Some(peer), Some(colocalized)) =
                    (self.peers.get_mut(&user_id), colocalized)
                {
                    peer.colocalized = colocalized;
                }
                Ok(vec![])
            },
            Message::ColocalizationData { user_id: None, .. } => Ok(vec![]),

            Message::ChatMessage { user_id: Some(user_id), message, .. } => {
                Ok(vec![ClientAction::DeliverChat { user_id, message }])
            },
            Message::ChatMessage { user_id: None, .. } => Ok(vec![]),

            Message::Pong { client_timestamp, .. } => {
                let rtt_ms = (self.env.unix_time() - client_timestamp) * 1000.0;
                self.quality.record_rtt(rtt_ms);
                let now = self.env.now();
                if self.rate.observe(self.quality.quality(), now) {
                    self.pose_filter.set_interval(self.rate.interval());
                    return Ok(vec![ClientAction::Log {
                        message: format!(
                            "pose interval now {:?} (quality {:?})",
                            self.rate.interval(),
                            self.quality.quality()
                        ),
                    }]);
                }
                Ok(vec![])
            },

            Message::Error { code, message } => {
                if code == "session_expired" {
                    self.reset_to_disconnected();
                    return Ok(vec![ClientAction::Terminated { reason: message }]);
                }
                if self.state == ConnectionState::Connecting
                    || matches!(self.state, ConnectionState::Reconnecting { .. })
                {
                    // The server refused the session request itself.
                    self.reset_to_disconnected();
                    return Err(ClientError::SessionRejected { code, message });
                }
                Ok(vec![ClientAction::Log { message: format!("server error {code}: {message}") }])
            },

            // Server-bound messages echoed back are protocol noise.
            Message::SessionCreate { .. }
            | Message::SessionJoin { .. }
            | Message::Ping { .. } => Ok(vec![]),
        }
    }

    fn handle_local_pose(&mut self, pose: Pose) -> Result<Vec<ClientAction>, ClientError> {
        self.require_connected()?;
        // Poses mean nothing to peers until we are in the shared frame.
        if !self.colocalized {
            return Ok(vec![]);
        }
        let now = self.env.now();
        if !self.pose_filter.offer(&pose, now) {
            return Ok(vec![]);
        }
        Ok(vec![ClientAction::Send(Message::PoseUpdate { user_id: None, pose })])
    }

    fn handle_tick(&mut self) -> Vec<ClientAction> {
        if self.state != ConnectionState::Connected {
            return vec![];
        }
        let now = self.env.now();
        let due = self
            .last_ping
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.ping_interval);
        if !due {
            return vec![];
        }
        self.last_ping = Some(now);
        vec![ClientAction::Send(Message::Ping { timestamp: self.env.unix_time() })]
    }

    fn clear_caches(&mut self) {
        self.peers.clear();
        self.anchors.clear();
        self.coordinate_system = None;
        self.pose_filter.reset();
        self.last_ping = None;
    }

    fn reset_to_disconnected(&mut self) {
        self.clear_caches();
        self.state = ConnectionState::Disconnected;
        self.intent = None;
        self.session = None;
        self.awaiting_snapshot = false;
        self.colocalized = false;
    }
}
