//! Local mirror of a remote lobby.
//!
//! A [`LobbySnapshot`] is created from the server's `lobby` packet and then
//! mutated in place by incremental packets (currently only `gameStarted`).
//! Users, settings and challenges are received from the server and never
//! edited locally.

use std::{collections::HashMap, fmt};

use serde::{
    Deserialize, Deserializer, Serialize,
    de::{self, Unexpected, Visitor},
};
use serde_json::{Map, Value};

use crate::message::{GameStartedPacket, LobbyPacket};

/// Identifier of a user.
///
/// The backend stores numeric ids while the lobby server keys its user map by
/// string, so both JSON strings and integers are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => UserId(text),
            RawId::Number(number) => UserId(number.to_string()),
        })
    }
}

/// Decodes a millisecond timestamp sent as any JSON number.
///
/// Servers written against a float-only number type may send `1000.0` or
/// `1.7e12`; fractions are rounded to the nearest millisecond.
pub(crate) fn deserialize_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct MillisVisitor;

    impl Visitor<'_> for MillisVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a millisecond timestamp")
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<i64, E> {
            Ok(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<i64, E> {
            i64::try_from(value).map_err(|_| E::invalid_value(Unexpected::Unsigned(value), &self))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<i64, E> {
            let rounded = value.round();
            // 2^63 is exactly representable, so the upper bound is exclusive.
            if rounded.is_finite() && rounded >= i64::MIN as f64 && rounded < i64::MAX as f64 {
                Ok(rounded as i64)
            } else {
                Err(E::invalid_value(Unexpected::Float(value), &self))
            }
        }
    }

    deserializer.deserialize_any(MillisVisitor)
}

/// A participant as reported by the lobby server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Configuration chosen when the lobby was created. Opaque to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbySettings(pub Map<String, Value>);

/// The task attached to a started game. Opaque to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Challenge(pub Map<String, Value>);

impl Challenge {
    /// The challenge's `id` field, when the server sent a string id.
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }
}

/// Coarse lifecycle stage of a lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LobbyPhase {
    #[serde(rename = "Waiting", alias = "waiting")]
    Waiting,
    #[serde(rename = "game", alias = "InGame")]
    InGame {
        #[serde(rename = "startTime", deserialize_with = "deserialize_millis")]
        start_time: i64,
        challenge: Challenge,
    },
}

impl LobbyPhase {
    pub fn is_in_game(&self) -> bool {
        matches!(self, Self::InGame { .. })
    }
}

/// The client's copy of the lobby state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbySnapshot {
    pub id: String,
    pub settings: LobbySettings,
    pub owner: User,
    pub users: HashMap<UserId, User>,
    pub state: LobbyPhase,
}

impl LobbySnapshot {
    pub fn participant(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    pub fn participant_count(&self) -> usize {
        self.users.len()
    }

    /// Moves the lobby into the in-game phase described by `packet`.
    pub fn start_game(&mut self, packet: &GameStartedPacket) {
        self.state = LobbyPhase::InGame {
            start_time: packet.start_time,
            challenge: packet.challenge.clone(),
        };
    }
}

impl From<LobbyPacket> for LobbySnapshot {
    fn from(packet: LobbyPacket) -> Self {
        Self {
            id: packet.id,
            settings: packet.settings,
            owner: packet.owner,
            users: packet.users,
            state: packet.state,
        }
    }
}
