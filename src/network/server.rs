//! WebSocket Session Host
//!
//! Async WebSocket server hosting one authoritative session.
//! Binds each connection to a participant, routes intents into the
//! coordinator, ticks it at a fixed rate and fans replication out to
//! every connection.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::events::EndingCause;
use crate::game::flow::FlowState;
use crate::game::types::{NodeRole, ParticipantId, SceneId};
use crate::network::protocol::{
    parse_participant_id, ClientMessage, ErrorCode, ProtocolError, ServerMessage, WelcomeInfo,
};
use crate::session::config::SessionConfig;
use crate::session::coordinator::SessionCoordinator;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle connection timeout.
    pub connection_timeout: Duration,
    /// Simulation tick rate (Hz).
    pub tick_rate: u32,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 64,
            connection_timeout: Duration::from_secs(30),
            tick_rate: crate::TICK_RATE,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load overrides from `ASCENT_BIND` and `ASCENT_TICK_RATE`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("ASCENT_BIND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            tick_rate: std::env::var("ASCENT_TICK_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|rate| *rate > 0)
                .unwrap_or(defaults.tick_rate),
            ..defaults
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Connected client state.
struct ConnectedClient {
    /// Participant bound by `join`.
    participant: Option<ParticipantId>,
    /// Last activity.
    last_activity: Instant,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The session host.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Authoritative session.
    coordinator: Arc<Mutex<SessionCoordinator>>,
    /// Connected clients.
    clients: Clients,
    /// Fan-out of replication updates and events.
    outbound_tx: broadcast::Sender<ServerMessage>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server hosting a fresh session.
    pub fn new(config: ServerConfig, session: SessionConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (outbound_tx, _) = broadcast::channel(1024);

        Self {
            config,
            coordinator: Arc::new(Mutex::new(SessionCoordinator::new(NodeRole::Authority, session))),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            outbound_tx,
            shutdown_tx,
        }
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Session host listening on {}", self.config.bind_addr);

        let tick_coordinator = self.coordinator.clone();
        let tick_outbound = self.outbound_tx.clone();
        let tick_rate = self.config.tick_rate.max(1);
        let tick_handle = tokio::spawn(async move {
            Self::run_tick_loop(tick_coordinator, tick_outbound, tick_rate).await;
        });

        let cleanup_clients = self.clients.clone();
        let cleanup_coordinator = self.coordinator.clone();
        let cleanup_outbound = self.outbound_tx.clone();
        let timeout = self.config.connection_timeout;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_clients, cleanup_coordinator, cleanup_outbound, timeout).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("{}, rejecting {}", GameServerError::ConnectionLimitReached, addr);
                                tokio::spawn(async move {
                                    if let Err(e) = Self::reject_overloaded(stream).await {
                                        debug!("Overload notice to {} failed: {}", addr, e);
                                    }
                                });
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        tick_handle.abort();
        cleanup_handle.abort();

        self.coordinator.lock().await.teardown();
        Ok(())
    }

    /// Tell an over-limit client the server is full, then close.
    async fn reject_overloaded(stream: TcpStream) -> Result<(), GameServerError> {
        let mut ws = accept_async(stream).await?;
        let notice = ServerMessage::error(ErrorCode::ServerOverloaded, "Server is full").to_json()?;
        ws.send(Message::Text(notice)).await?;
        ws.close(None).await?;
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let coordinator = self.coordinator.clone();
        let outbound_tx = self.outbound_tx.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);
            let mut outbound_rx = outbound_tx.subscribe();

            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    participant: None,
                    last_activity: Instant::now(),
                });
            }

            // Direct replies and session fan-out share one writer.
            let lag_coordinator = coordinator.clone();
            let sender_task = tokio::spawn(async move {
                loop {
                    let msg = tokio::select! {
                        direct = msg_rx.recv() => match direct {
                            Some(msg) => msg,
                            None => break,
                        },
                        fanout = outbound_rx.recv() => match fanout {
                            Ok(msg) => msg,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("{} lagged by {} messages, resyncing", addr, skipped);
                                ServerMessage::Snapshot { snapshot: lag_coordinator.lock().await.snapshot() }
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    };
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::error(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        )).await;
                                        continue;
                                    }
                                };

                                {
                                    let mut clients = clients.write().await;
                                    if let Some(client) = clients.get_mut(&addr) {
                                        client.last_activity = Instant::now();
                                    }
                                }

                                let leave = matches!(client_msg, ClientMessage::Leave);
                                Self::handle_client_message(
                                    addr,
                                    client_msg,
                                    &clients,
                                    &coordinator,
                                    &outbound_tx,
                                    &config,
                                    &msg_tx,
                                ).await;
                                if leave {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::error(
                                    ErrorCode::UnsupportedFormat,
                                    "Send intents as JSON text frames",
                                )).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            sender_task.abort();
            Self::disconnect(addr, &clients, &coordinator, &outbound_tx).await;
            info!("Client {} cleaned up", addr);
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &Clients,
        coordinator: &Arc<Mutex<SessionCoordinator>>,
        outbound_tx: &broadcast::Sender<ServerMessage>,
        config: &ServerConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let bound = clients.read().await.get(&addr).and_then(|c| c.participant);

        match msg {
            ClientMessage::Join { participant_id, rank } => {
                if bound.is_some() {
                    let _ = sender.send(ServerMessage::error(ErrorCode::AlreadyJoined, "Connection already joined")).await;
                    return;
                }
                let participant = match parse_participant_id(&participant_id) {
                    Ok(id) => id,
                    Err(e) => {
                        let _ = sender.send(ServerMessage::error(ErrorCode::InvalidInput, e.to_string())).await;
                        return;
                    }
                };

                {
                    let mut clients = clients.write().await;
                    if clients.values().any(|c| c.participant == Some(participant)) {
                        drop(clients);
                        let _ = sender.send(ServerMessage::error(ErrorCode::AlreadyJoined, "Participant bound elsewhere")).await;
                        return;
                    }
                    if let Some(client) = clients.get_mut(&addr) {
                        client.participant = Some(participant);
                    }
                }
                info!("{} joined as {} (rank {})", addr, participant, rank);

                let snapshot = {
                    let mut c = coordinator.lock().await;
                    c.on_participant_joined(participant, rank);
                    if c.turns().is_running() && c.flow().state() == FlowState::Idle {
                        c.start_session();
                    }
                    Self::flush(&mut c, outbound_tx);
                    c.snapshot()
                };

                let _ = sender.send(ServerMessage::Welcome(WelcomeInfo {
                    participant_id: participant.to_uuid_string(),
                    rank,
                    server_version: config.version.clone(),
                    tick_rate: config.tick_rate,
                })).await;
                let _ = sender.send(ServerMessage::Snapshot { snapshot }).await;
            }
            ClientMessage::SyncRequest => {
                let snapshot = coordinator.lock().await.snapshot();
                let _ = sender.send(ServerMessage::Snapshot { snapshot }).await;
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender.send(ServerMessage::Pong {
                    timestamp,
                    server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
                }).await;
            }
            ClientMessage::Leave => {
                Self::disconnect(addr, clients, coordinator, outbound_tx).await;
            }
            intent => {
                let Some(participant) = bound else {
                    let _ = sender.send(ServerMessage::error(ErrorCode::NotJoined, "Join before sending intents")).await;
                    return;
                };
                let mut c = coordinator.lock().await;
                if !route_intent(&mut c, participant, &intent) {
                    debug!("{:?} from {} had no effect", intent, participant);
                }
                Self::flush(&mut c, outbound_tx);
            }
        }
    }

    /// Unbind a connection and remove its participant from the session.
    async fn disconnect(
        addr: SocketAddr,
        clients: &Clients,
        coordinator: &Arc<Mutex<SessionCoordinator>>,
        outbound_tx: &broadcast::Sender<ServerMessage>,
    ) {
        let participant = clients.write().await.remove(&addr).and_then(|c| c.participant);

        if let Some(participant) = participant {
            let mut c = coordinator.lock().await;
            c.on_participant_left(participant);
            Self::flush(&mut c, outbound_tx);
        }
    }

    /// Publish drained events and replication updates to every connection.
    fn flush(coordinator: &mut SessionCoordinator, outbound_tx: &broadcast::Sender<ServerMessage>) {
        for event in coordinator.drain_events() {
            let _ = outbound_tx.send(ServerMessage::Event { event });
        }
        for update in coordinator.drain_replication() {
            let _ = outbound_tx.send(ServerMessage::Replicated { update });
        }
    }

    /// Fixed-rate simulation loop.
    async fn run_tick_loop(
        coordinator: Arc<Mutex<SessionCoordinator>>,
        outbound_tx: broadcast::Sender<ServerMessage>,
        tick_rate: u32,
    ) {
        let tick_duration = Duration::from_micros(1_000_000 / tick_rate as u64);
        let dt_secs = tick_duration.as_secs_f64();
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;
            let mut c = coordinator.lock().await;
            if c.advance(dt_secs) {
                Self::flush(&mut c, &outbound_tx);
            }
        }
    }

    /// Drop idle connections.
    async fn run_cleanup_loop(
        clients: Clients,
        coordinator: Arc<Mutex<SessionCoordinator>>,
        outbound_tx: broadcast::Sender<ServerMessage>,
        timeout: Duration,
    ) {
        let mut interval = interval(Duration::from_secs(5));

        loop {
            interval.tick().await;

            let idle: Vec<SocketAddr> = {
                let clients = clients.read().await;
                clients.iter()
                    .filter(|(_, c)| c.last_activity.elapsed() > timeout)
                    .map(|(addr, _)| *addr)
                    .collect()
            };
            for addr in idle {
                Self::disconnect(addr, &clients, &coordinator, &outbound_tx).await;
                info!("Removed idle client {}", addr);
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Subscribe to the session fan-out.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.outbound_tx.subscribe()
    }

    /// Shared handle to the hosted session.
    pub fn coordinator(&self) -> Arc<Mutex<SessionCoordinator>> {
        self.coordinator.clone()
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Route an intent from a bound participant into the coordinator.
///
/// The participant is always the connection's bound identity, never one
/// carried in the message.
pub fn route_intent(coordinator: &mut SessionCoordinator, participant: ParticipantId, intent: &ClientMessage) -> bool {
    match intent {
        ClientMessage::EndTurn => coordinator.on_turn_end_requested(participant),
        ClientMessage::SpendAction => coordinator.on_action_spent(participant).is_some(),
        ClientMessage::Died => {
            coordinator.on_session_ending_signal(EndingCause::ParticipantDied { participant })
        }
        ClientMessage::EnterGate { .. } => match intent.slot_key() {
            Some(key) => coordinator.on_gate_entered(&key, participant),
            None => false,
        },
        ClientMessage::ExitGate { .. } => match intent.slot_key() {
            Some(key) => coordinator.on_gate_exited(&key, participant),
            None => false,
        },
        ClientMessage::RequestBonus { multiplier_delta, duration_turns } => {
            coordinator.on_hazard_bonus_requested(*multiplier_delta, *duration_turns)
        }
        ClientMessage::Retry => coordinator.on_retry_requested(),
        ClientMessage::SceneLoaded { scene } => {
            coordinator.on_load_acknowledged(&SceneId::new(scene.as_str()), participant)
        }
        ClientMessage::Checkpoint { coordinate } => coordinator.on_checkpoint_reached(*coordinate),
        ClientMessage::Join { .. }
        | ClientMessage::SyncRequest
        | ClientMessage::Ping { .. }
        | ClientMessage::Leave => false,
    }
}
