use clap::{Args, Parser, Subcommand};

use crate::{
    directory::{DEFAULT_BACKEND_URL, DEFAULT_LOBBY_API_URL, DirectoryConfig},
    session::{DEFAULT_ENDPOINT, Intent, SessionConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new lobby and stay in it.
    Create(SessionArgs),
    /// Join an existing lobby as a new participant.
    Join(LobbyArgs),
    /// Reattach to a lobby you already belong to.
    Connect(LobbyArgs),
    /// List open lobbies.
    Lobbies(DirectoryArgs),
    /// List registered users.
    Users(DirectoryArgs),
    /// Show one user by username.
    User(UserArgs),
    /// Show the current user's profile.
    Profile(DirectoryArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Base WebSocket URL of the lobby server.
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

impl SessionArgs {
    pub fn config(&self) -> SessionConfig {
        SessionConfig::new(self.endpoint.clone())
    }
}

#[derive(Args, Debug, Clone)]
pub struct LobbyArgs {
    /// Identifier of the lobby.
    pub lobby_id: String,

    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct DirectoryArgs {
    /// Base URL of the user backend.
    #[arg(long, default_value = DEFAULT_BACKEND_URL)]
    pub backend: String,

    /// Base URL of the lobby listing API.
    #[arg(long, default_value = DEFAULT_LOBBY_API_URL)]
    pub lobby_api: String,
}

impl DirectoryArgs {
    pub fn config(&self) -> DirectoryConfig {
        DirectoryConfig::new(self.backend.clone(), self.lobby_api.clone())
    }
}

#[derive(Args, Debug, Clone)]
pub struct UserArgs {
    pub username: String,

    #[command(flatten)]
    pub directory: DirectoryArgs,
}

impl Command {
    /// Session intent and config for the lobby subcommands.
    pub fn session(&self) -> Option<(Intent, SessionConfig)> {
        match self {
            Command::Create(args) => Some((Intent::Create, args.config())),
            Command::Join(args) => Some((Intent::Join(args.lobby_id.clone()), args.session.config())),
            Command::Connect(args) => Some((
                Intent::Connect(args.lobby_id.clone()),
                args.session.config(),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_parses_lobby_and_endpoint() {
        let cli = Cli::try_parse_from([
            "lobby-session",
            "join",
            "L1",
            "--endpoint",
            "ws://lobby.test:9000",
        ])
        .expect("parse join");

        let (intent, config) = cli.command.session().expect("session command");
        assert_eq!(intent, Intent::Join("L1".into()));
        assert_eq!(config.endpoint, "ws://lobby.test:9000");
    }

    #[test]
    fn directory_commands_have_defaults() {
        let cli = Cli::try_parse_from(["lobby-session", "lobbies"]).expect("parse lobbies");
        assert!(cli.command.session().is_none());
        match cli.command {
            Command::Lobbies(args) => assert_eq!(args.config(), DirectoryConfig::default()),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
