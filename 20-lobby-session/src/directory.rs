//! Request/response lookups that live beside the lobby connection: user
//! profiles from the backend and the list of open lobbies from the lobby
//! server. Stateless; every call is a single GET.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::lobby::UserId;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3000";
pub const DEFAULT_LOBBY_API_URL: &str = "http://localhost:8080";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("received error code {status} from backend: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub backend_url: String,
    pub lobby_api_url: String,
}

impl DirectoryConfig {
    pub fn new(backend_url: impl Into<String>, lobby_api_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            lobby_api_url: lobby_api_url.into(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_URL, DEFAULT_LOBBY_API_URL)
    }
}

/// Full user record, as returned for the current user or a lookup by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub background_img: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Public fields of a user, as returned by the user listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub background_img: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Entry in the open-lobby listing. Only the id is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySummary {
    pub id: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct LobbyDirectory {
    client: reqwest::Client,
    config: DirectoryConfig,
}

impl LobbyDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: DirectoryConfig) -> Self {
        Self { client, config }
    }

    pub async fn fetch_profile(&self) -> Result<UserProfile, DirectoryError> {
        self.get_json(backend_url(&self.config, "v1/user/profile"))
            .await
    }

    pub async fn fetch_user(&self, username: &str) -> Result<UserProfile, DirectoryError> {
        self.get_json(backend_url(&self.config, &format!("v1/user/{username}")))
            .await
    }

    pub async fn fetch_users(&self) -> Result<Vec<UserSummary>, DirectoryError> {
        self.get_json(backend_url(&self.config, "v1/user")).await
    }

    pub async fn fetch_lobby_list(&self) -> Result<Vec<LobbySummary>, DirectoryError> {
        let url = format!("{}/lobbies", self.config.lobby_api_url.trim_end_matches('/'));
        self.get_json(url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, DirectoryError> {
        debug!(%url, "directory request");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(DirectoryError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|source| DirectoryError::Decode { url, source })
    }
}

fn backend_url(config: &DirectoryConfig, path: &str) -> String {
    format!("{}/{path}", config.backend_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lobby_summary_keeps_unknown_fields() {
        let summary: LobbySummary = serde_json::from_value(json!({
            "id": "L1",
            "owner": "alice",
            "players": 3
        }))
        .expect("summary");

        assert_eq!(summary.id, "L1");
        assert_eq!(summary.details.get("players"), Some(&json!(3)));
    }

    #[test]
    fn backend_paths_ignore_trailing_slash() {
        let config = DirectoryConfig::new("http://api.test/", "http://lobby.test");
        assert_eq!(backend_url(&config, "v1/user"), "http://api.test/v1/user");
    }

    #[test]
    fn http_error_message_carries_status_and_body() {
        let err = DirectoryError::Http {
            status: 404,
            body: r#"{"error":"not found"}"#.into(),
        };
        assert_eq!(
            err.to_string(),
            r#"received error code 404 from backend: {"error":"not found"}"#
        );
    }
}
