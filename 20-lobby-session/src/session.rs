//! One client connection to a lobby.
//!
//! A [`LobbySession`] dials the lobby server, waits for the first `lobby`
//! snapshot, and from then on mirrors the lobby locally. All inbound frames
//! are handled by a single background task that owns the WebSocket, so
//! snapshot updates and listener calls happen strictly in delivery order.
//!
//! ```text
//!  Unstarted ──start()──▶ Connecting ──lobby──▶ Ready ──close──▶ Closed
//!                             │
//!                             └──error/close──▶ Failed
//! ```

use std::{
    fmt,
    ops::ControlFlow,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    select,
    sync::{broadcast, mpsc, oneshot, watch},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, info, warn};

use crate::{
    error::SessionError,
    lobby::LobbySnapshot,
    message::{ClientToServer, InboundEvent, ServerToClient, decode_packet, encode_command},
    registry::{SubscriberRegistry, Subscription},
};

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080";

// Signals are diagnostics; slow receivers lag rather than stall the connection.
const SIGNAL_CAPACITY: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Base WebSocket URL of the lobby server, e.g. `ws://localhost:8080`.
    pub endpoint: String,
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn url_for(&self, intent: &Intent) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), intent.path())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

/// Why the session is being opened. Encoded in the connection path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Create a new lobby owned by this client.
    Create,
    /// Join an existing lobby as a new participant.
    Join(String),
    /// Attach to a lobby this client already belongs to.
    Connect(String),
}

impl Intent {
    pub fn path(&self) -> String {
        match self {
            Self::Create => "create".to_string(),
            Self::Join(lobby_id) => format!("join/{lobby_id}"),
            Self::Connect(lobby_id) => format!("connect/{lobby_id}"),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Connecting,
    Ready,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Out-of-band notifications for problems that happen after `start()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// An inbound frame was rejected and skipped.
    FrameDropped(SessionError),
    /// The connection ended. `reason` is `None` for a caller-initiated close.
    Closed { reason: Option<SessionError> },
}

enum Outbound {
    Frame(String),
    Close,
}

/// State shared between the session handle and its connection task.
struct Shared {
    snapshot: Mutex<Option<LobbySnapshot>>,
    registry: Arc<SubscriberRegistry>,
    state: watch::Sender<SessionState>,
    signals: broadcast::Sender<SessionSignal>,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Unstarted);
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            snapshot: Mutex::new(None),
            registry: Arc::new(SubscriberRegistry::default()),
            state,
            signals,
        }
    }

    fn snapshot(&self) -> MutexGuard<'_, Option<LobbySnapshot>> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn signal(&self, signal: SessionSignal) {
        // No receivers is the common case.
        let _ = self.signals.send(signal);
    }
}

pub struct LobbySession {
    config: SessionConfig,
    intent: Intent,
    shared: Arc<Shared>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

impl LobbySession {
    /// Opens a session that creates a new lobby.
    pub async fn create(config: SessionConfig) -> Result<Self, SessionError> {
        Self::open(config, Intent::Create).await
    }

    pub async fn join(config: SessionConfig, lobby_id: &str) -> Result<Self, SessionError> {
        Self::open(config, Intent::Join(lobby_id.to_string())).await
    }

    pub async fn connect(config: SessionConfig, lobby_id: &str) -> Result<Self, SessionError> {
        Self::open(config, Intent::Connect(lobby_id.to_string())).await
    }

    async fn open(config: SessionConfig, intent: Intent) -> Result<Self, SessionError> {
        let mut session = Self::new(config, intent);
        session.start().await?;
        Ok(session)
    }

    /// Builds an unstarted session. Nothing is dialed until [`Self::start`].
    pub fn new(config: SessionConfig, intent: Intent) -> Self {
        Self {
            config,
            intent,
            shared: Arc::new(Shared::new()),
            outbound: None,
        }
    }

    /// Connects and waits for the first lobby snapshot.
    ///
    /// Frames arriving before the snapshot go through normal dispatch. Fails
    /// with [`SessionError::Connection`] if the connection errors or closes
    /// first, and with [`SessionError::Protocol`] if a frame cannot be
    /// decoded. A session can only be started once.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.state() != SessionState::Unstarted {
            return Err(SessionError::AlreadyStarted);
        }
        self.shared.set_state(SessionState::Connecting);

        let url = self.config.url_for(&self.intent);
        let ws = match connect_async(url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(err) => {
                warn!(%url, error = %err, "failed to connect to lobby server");
                self.shared.set_state(SessionState::Failed);
                return Err(SessionError::connection(format!(
                    "failed to connect to {url}: {err}"
                )));
            }
        };
        info!(%url, "connected to lobby server");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        self.outbound = Some(outbound_tx);

        let connection = Connection {
            shared: Arc::clone(&self.shared),
            path: self.intent.path(),
            handshake: Some(ready_tx),
        };
        tokio::spawn(connection.run(ws, outbound_rx));

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::connection(
                "connection task ended before the handshake completed",
            )),
        }
    }

    pub fn intent(&self) -> &Intent {
        &self.intent
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Queues a command for the server. Does not wait for delivery.
    pub fn send(&self, command: &ClientToServer) -> Result<(), SessionError> {
        let Some(outbound) = self.outbound.as_ref() else {
            return Err(SessionError::NotConnected);
        };
        if self.state().is_terminal() {
            return Err(SessionError::NotConnected);
        }

        let frame = encode_command(command)?;
        outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| SessionError::NotConnected)
    }

    /// Asks the server to start the game.
    pub fn start_game(&self) -> Result<(), SessionError> {
        self.send(&ClientToServer::start_lobby())
    }

    /// Returns a copy of the mirrored lobby.
    pub fn current_snapshot(&self) -> Result<LobbySnapshot, SessionError> {
        self.shared
            .snapshot()
            .clone()
            .ok_or(SessionError::NotReady)
    }

    /// Registers `listener` for packets of type `E`, replacing any listener
    /// already registered for that type.
    pub fn subscribe<E, F>(&self, listener: F) -> Subscription
    where
        E: InboundEvent,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.shared.registry.register(listener)
    }

    pub fn signals(&self) -> broadcast::Receiver<SessionSignal> {
        self.shared.signals.subscribe()
    }

    /// Closes the connection. A no-op once the session has ended.
    pub fn close(&self) {
        if let Some(outbound) = self.outbound.as_ref() {
            let _ = outbound.send(Outbound::Close);
        }
    }

    /// Waits until the session reaches `Closed` or `Failed`.
    ///
    /// Never resolves for a session that was not started.
    pub async fn closed(&self) -> SessionState {
        let mut state = self.shared.state.subscribe();
        match state.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }
}

impl fmt::Debug for LobbySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LobbySession")
            .field("endpoint", &self.config.endpoint)
            .field("intent", &self.intent)
            .field("state", &self.state())
            .finish()
    }
}

/// The task side of a session; sole owner of the socket.
struct Connection {
    shared: Arc<Shared>,
    path: String,
    handshake: Option<oneshot::Sender<Result<(), SessionError>>>,
}

type Flow = ControlFlow<Option<SessionError>>;

impl Connection {
    async fn run(mut self, ws: WsStream, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
        let (mut sink, mut stream) = ws.split();

        let reason = loop {
            let flow = select! {
                frame = stream.next() => self.handle_frame(frame),
                command = outbound.recv() => handle_outbound(command, &mut sink).await,
            };
            if let ControlFlow::Break(reason) = flow {
                break reason;
            }
        };

        drop(outbound);
        self.finish(reason);
    }

    fn handle_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) -> Flow {
        match frame {
            Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
            Some(Ok(Message::Binary(_))) => self.reject(SessionError::protocol(
                "<binary>",
                "expected a text frame",
            )),
            Some(Ok(Message::Close(frame))) => {
                let detail = frame
                    .map(|frame| format!(" ({} {})", u16::from(frame.code), frame.reason.as_str()))
                    .unwrap_or_default();
                ControlFlow::Break(Some(SessionError::connection(format!(
                    "server closed the connection{detail}"
                ))))
            }
            Some(Ok(_)) => ControlFlow::Continue(()),
            Some(Err(err)) => ControlFlow::Break(Some(SessionError::connection(err))),
            None => ControlFlow::Break(Some(SessionError::connection(
                "connection ended without a close frame",
            ))),
        }
    }

    fn handle_text(&mut self, text: &str) -> Flow {
        match decode_packet(text) {
            Ok(packet) => {
                self.dispatch(packet);
                ControlFlow::Continue(())
            }
            Err(err) => self.reject(err),
        }
    }

    /// A bad frame fails the handshake; after it, the frame is skipped.
    fn reject(&mut self, error: SessionError) -> Flow {
        if self.handshake.is_some() {
            return ControlFlow::Break(Some(error));
        }
        warn!(path = %self.path, %error, "dropping inbound frame");
        self.shared.signal(SessionSignal::FrameDropped(error));
        ControlFlow::Continue(())
    }

    /// Runs the internal handler for the packet, then the external listener.
    fn dispatch(&mut self, packet: ServerToClient) {
        if let Err(error) = self.apply(&packet) {
            warn!(path = %self.path, kind = %packet.kind(), %error, "dropping inbound packet");
            self.shared.signal(SessionSignal::FrameDropped(error));
            return;
        }

        self.shared.registry.notify(&packet);

        if let ServerToClient::Lobby(_) = packet {
            if let Some(ready) = self.handshake.take() {
                info!(path = %self.path, "lobby session ready");
                self.shared.set_state(SessionState::Ready);
                let _ = ready.send(Ok(()));
            }
        }
    }

    fn apply(&self, packet: &ServerToClient) -> Result<(), SessionError> {
        let mut snapshot = self.shared.snapshot();
        match packet {
            ServerToClient::Lobby(lobby) => {
                let lobby = LobbySnapshot::from(lobby.clone());
                debug!(
                    lobby = %lobby.id,
                    users = lobby.participant_count(),
                    in_game = lobby.state.is_in_game(),
                    "applied lobby snapshot"
                );
                *snapshot = Some(lobby);
            }
            ServerToClient::GameStarted(started) => {
                let lobby = snapshot.as_mut().ok_or(SessionError::NotReady)?;
                lobby.start_game(started);
                debug!(lobby = %lobby.id, start_time = started.start_time, "game started");
            }
        }
        Ok(())
    }

    fn finish(mut self, reason: Option<SessionError>) {
        match self.handshake.take() {
            Some(ready) => {
                let error = reason.unwrap_or_else(|| {
                    SessionError::connection("connection closed before the lobby snapshot arrived")
                });
                warn!(path = %self.path, %error, "lobby handshake failed");
                self.shared.set_state(SessionState::Failed);
                self.shared.signal(SessionSignal::Closed {
                    reason: Some(error.clone()),
                });
                let _ = ready.send(Err(error));
            }
            None => {
                match &reason {
                    Some(error) => warn!(path = %self.path, %error, "lobby session closed"),
                    None => info!(path = %self.path, "lobby session closed"),
                }
                self.shared.set_state(SessionState::Closed);
                self.shared.signal(SessionSignal::Closed { reason });
            }
        }
    }
}

async fn handle_outbound<S>(command: Option<Outbound>, sink: &mut S) -> Flow
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match command {
        Some(Outbound::Frame(frame)) => match sink.send(Message::Text(frame.into())).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(Some(SessionError::connection(format!(
                "failed to send frame: {err}"
            )))),
        },
        // Explicit close, or every session handle was dropped.
        Some(Outbound::Close) | None => {
            if let Err(err) = sink.close().await {
                debug!(error = %err, "failed to close lobby connection cleanly");
            }
            ControlFlow::Break(None)
        }
    }
}
