//! Locus production server.
//!
//! This crate provides the production server implementation using:
//! - Tokio-tungstenite for WebSocket transport
//! - Tokio for async runtime
//! - System time and cryptographic RNG
//!
//! ## Architecture
//!
//! ```text
//! locus-server
//!   ├─ SystemEnv           (production Environment impl)
//!   ├─ WebSocket accept loop  (one task per connection)
//!   ├─ ServerDriver        (Sans-IO orchestrator, one lock)
//!   ├─ SessionRegistry     (share codes + TTL)    [locus-core]
//!   └─ Session             (per-session state)    [locus-core]
//! ```
//!
//! Every event funnels through one `tokio::sync::Mutex` around the driver;
//! connection tasks decode frames outside the lock and execute the returned
//! actions through per-connection outbound channels.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
mod registry;
mod system_env;

use std::{collections::HashMap, sync::Arc, time::Duration};

pub use driver::{
    DriverConfig, LogLevel, ServerAction, ServerDriver, ServerEvent, SessionStats,
};
pub use error::ServerError;
use futures_util::{SinkExt, StreamExt};
use locus_proto::Message;
pub use registry::{Binding, ConnectionRegistry};
pub use system_env::SystemEnv;
use tokio::{net::TcpListener, sync::mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Interval between driver ticks.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:8080")
    pub bind_address: String,
    /// Driver configuration (TTL, caps, sweep cadence)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:8080".to_string(), driver: DriverConfig::default() }
    }
}

/// Frames queued toward one connection's writer task.
enum Outbound {
    Frame(String),
    Close(String),
}

type SharedDriver = Arc<tokio::sync::Mutex<ServerDriver<SystemEnv>>>;
type Senders = Arc<tokio::sync::Mutex<HashMap<u64, mpsc::UnboundedSender<Outbound>>>>;

/// Production Locus server.
///
/// Wraps `ServerDriver` with WebSocket transport and system environment.
pub struct Server {
    driver: SharedDriver,
    senders: Senders,
    listener: TcpListener,
    env: SystemEnv,
}

impl Server {
    /// Create and bind a new server.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let driver = ServerDriver::new(env.clone(), config.driver);
        let listener = TcpListener::bind(&config.bind_address).await?;

        Ok(Self {
            driver: Arc::new(tokio::sync::Mutex::new(driver)),
            senders: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            listener,
            env,
        })
    }

    /// Get the local address the server is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the server, accepting connections and processing messages.
    ///
    /// This method runs until the server is shut down or an error occurs.
    ///
    /// # Errors
    ///
    /// Returns an error if the accept loop fails irrecoverably.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("server listening on {}", self.local_addr()?);

        spawn_tick_task(Arc::clone(&self.driver), Arc::clone(&self.senders));

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let driver = Arc::clone(&self.driver);
                    let senders = Arc::clone(&self.senders);
                    let env = self.env.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, driver, senders, env).await {
                            tracing::debug!("connection from {peer} ended: {e}");
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("accept error: {e}");
                },
            }
        }
    }
}

/// Periodic tick; drives TTL sweeps and inactivity eviction.
fn spawn_tick_task(driver: SharedDriver, senders: Senders) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            let actions = {
                let mut driver = driver.lock().await;
                match driver.process_event(ServerEvent::Tick) {
                    Ok(actions) => actions,
                    Err(e) => {
                        tracing::error!("tick failed: {e}");
                        continue;
                    },
                }
            };
            execute_actions(actions, &senders).await;
        }
    });
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    driver: SharedDriver,
    senders: Senders,
    env: SystemEnv,
) -> Result<(), ServerError> {
    use locus_core::Environment;

    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let conn_id = env.random_u64();
    tracing::debug!("new connection: {conn_id}");

    // Writer task: drains the outbound queue into the socket so broadcasts
    // from other connections' tasks never block on this socket's I/O.
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    senders.lock().await.insert(conn_id, tx);

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(text) => {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                },
                Outbound::Close(reason) => {
                    tracing::debug!("closing connection: {reason}");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                },
            }
        }
    });

    {
        let mut driver = driver.lock().await;
        let actions = driver.process_event(ServerEvent::ConnectionAccepted { conn_id })?;
        drop(driver);
        execute_actions(actions, &senders).await;
    }

    let close_reason = loop {
        match source.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                // Decode outside the lock; malformed frames answer with an
                // error event instead of feeding the driver.
                let message = match Message::decode(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("connection {conn_id}: decode error: {e}");
                        let error = Message::Error {
                            code: "invalid_message".to_string(),
                            message: e.to_string(),
                        };
                        send_direct(&senders, conn_id, &error).await;
                        continue;
                    },
                };

                let actions = {
                    let mut driver = driver.lock().await;
                    match driver.process_event(ServerEvent::MessageReceived { conn_id, message }) {
                        Ok(actions) => actions,
                        Err(e) => {
                            tracing::warn!("message processing error: {e}");
                            continue;
                        },
                    }
                };
                execute_actions(actions, &senders).await;
            },
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {},
            Some(Ok(WsMessage::Close(_))) | None => break "client closed".to_string(),
            Some(Ok(_)) => {
                // Binary frames are not part of the protocol.
                break "unsupported frame type".to_string();
            },
            Some(Err(e)) => break format!("read error: {e}"),
        }
    };

    let actions = {
        let mut driver = driver.lock().await;
        driver
            .process_event(ServerEvent::ConnectionClosed { conn_id, reason: close_reason })
            .unwrap_or_default()
    };
    execute_actions(actions, &senders).await;

    senders.lock().await.remove(&conn_id);
    writer.abort();

    Ok(())
}

/// Encode one message straight onto a connection's outbound queue.
async fn send_direct(senders: &Senders, conn_id: u64, message: &Message) {
    let Ok(text) = message.encode() else { return };
    if let Some(tx) = senders.lock().await.get(&conn_id) {
        let _ = tx.send(Outbound::Frame(text));
    }
}

/// Execute driver actions against the connection writer queues.
async fn execute_actions(actions: Vec<ServerAction>, senders: &Senders) {
    for action in actions {
        match action {
            ServerAction::SendToConnection { conn_id, message } => {
                let text = match message.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("encode failed: {e}");
                        continue;
                    },
                };
                if let Some(tx) = senders.lock().await.get(&conn_id) {
                    let _ = tx.send(Outbound::Frame(text));
                }
            },

            ServerAction::CloseConnection { conn_id, reason } => {
                if let Some(tx) = senders.lock().await.get(&conn_id) {
                    let _ = tx.send(Outbound::Close(reason));
                }
            },

            ServerAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}
