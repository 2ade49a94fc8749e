//! Client for a real-time game lobby server.
//!
//! A [`session::LobbySession`] holds one WebSocket to the lobby server,
//! mirrors the lobby it is attached to, and hands typed events to whoever
//! subscribed. Each module focuses on a concrete responsibility:
//!
//! - [`session`] owns the connection lifecycle, the handshake that waits for
//!   the first lobby snapshot, and the single task that applies updates.
//! - [`message`] defines the JSON packets exchanged with the server and the
//!   strict decoder for inbound frames.
//! - [`lobby`] holds the mirrored lobby state and its users.
//! - [`registry`] keeps the one-listener-per-packet subscriptions.
//! - [`directory`] performs the stateless HTTP lookups (users, open lobbies).
//! - [`cli`] and [`client`] implement the terminal front end.
//! - [`error`] defines the session error taxonomy.
//!
//! There is no reconnection: once a session's connection ends, a new session
//! has to be opened.

pub mod cli;
pub mod client;
pub mod directory;
pub mod error;
pub mod lobby;
pub mod message;
pub mod registry;
pub mod session;

pub use error::SessionError;
pub use lobby::{Challenge, LobbyPhase, LobbySettings, LobbySnapshot, User, UserId};
pub use message::{ClientToServer, GameStartedPacket, LobbyPacket, PacketKind, ServerToClient};
pub use registry::Subscription;
pub use session::{Intent, LobbySession, SessionConfig, SessionSignal, SessionState};
