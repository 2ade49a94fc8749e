use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use lobby_session::{
    cli::{Cli, Command},
    client,
    directory::LobbyDirectory,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if let Some((intent, config)) = cli.command.session() {
        return client::run(intent, config).await;
    }

    match cli.command {
        Command::Lobbies(args) => {
            print_json(&LobbyDirectory::new(args.config()).fetch_lobby_list().await?)?
        }
        Command::Users(args) => {
            print_json(&LobbyDirectory::new(args.config()).fetch_users().await?)?
        }
        Command::User(args) => print_json(
            &LobbyDirectory::new(args.directory.config())
                .fetch_user(&args.username)
                .await?,
        )?,
        Command::Profile(args) => {
            print_json(&LobbyDirectory::new(args.config()).fetch_profile().await?)?
        }
        Command::Create(_) | Command::Join(_) | Command::Connect(_) => {}
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
