use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::SessionError,
    lobby::{Challenge, LobbyPhase, LobbySettings, User, UserId, deserialize_millis},
};

/// Full lobby state, sent once on connect and whenever the server resyncs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LobbyPacket {
    pub id: String,
    pub settings: LobbySettings,
    pub owner: User,
    pub users: HashMap<UserId, User>,
    pub state: LobbyPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameStartedPacket {
    #[serde(rename = "startTime", deserialize_with = "deserialize_millis")]
    pub start_time: i64,
    pub challenge: Challenge,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerToClient {
    Lobby(LobbyPacket),
    GameStarted(GameStartedPacket),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientToServer {
    StartLobby { start: bool },
}

impl ClientToServer {
    pub fn start_lobby() -> Self {
        Self::StartLobby { start: true }
    }
}

/// Tag of an inbound packet, used to key subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Lobby,
    GameStarted,
}

impl PacketKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::GameStarted => "gameStarted",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ServerToClient {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Lobby(_) => PacketKind::Lobby,
            Self::GameStarted(_) => PacketKind::GameStarted,
        }
    }
}

/// Payload types that can be subscribed to on a session.
pub trait InboundEvent: Send + Sync + 'static {
    const KIND: PacketKind;

    fn from_packet(packet: &ServerToClient) -> Option<&Self>;
}

impl InboundEvent for LobbyPacket {
    const KIND: PacketKind = PacketKind::Lobby;

    fn from_packet(packet: &ServerToClient) -> Option<&Self> {
        match packet {
            ServerToClient::Lobby(lobby) => Some(lobby),
            _ => None,
        }
    }
}

impl InboundEvent for GameStartedPacket {
    const KIND: PacketKind = PacketKind::GameStarted;

    fn from_packet(packet: &ServerToClient) -> Option<&Self> {
        match packet {
            ServerToClient::GameStarted(started) => Some(started),
            _ => None,
        }
    }
}

/// Decodes one inbound text frame.
///
/// The frame is parsed as a generic JSON value first so that errors can name
/// the offending `type` tag.
pub fn decode_packet(frame: &str) -> Result<ServerToClient, SessionError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|err| SessionError::protocol("<invalid json>", err))?;

    let tag = match value.get("type") {
        Some(Value::String(tag)) => tag.clone(),
        Some(_) => return Err(SessionError::protocol("<invalid>", "`type` must be a string")),
        None => return Err(SessionError::protocol("<missing>", "frame has no `type` field")),
    };

    serde_json::from_value(value).map_err(|err| SessionError::protocol(tag, err))
}

pub fn encode_command(command: &ClientToServer) -> Result<String, SessionError> {
    serde_json::to_string(command).map_err(|err| SessionError::protocol("<outbound>", err))
}
