use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    sync::{broadcast, mpsc},
    time::timeout,
};
use tracing::warn;

use crate::{
    lobby::{LobbyPhase, LobbySnapshot},
    message::{GameStartedPacket, LobbyPacket, ServerToClient},
    session::{Intent, LobbySession, SessionConfig, SessionSignal, SessionState},
};

const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub async fn run(intent: Intent, config: SessionConfig) -> Result<()> {
    let mut session = LobbySession::new(config, intent);

    // Listeners run on the connection task; forward to this loop for rendering.
    let (events_tx, mut events) = mpsc::unbounded_channel();
    forward_events(&session, events_tx);
    let mut signals = session.signals();

    let target = session.intent().to_string();
    session
        .start()
        .await
        .with_context(|| format!("failed to open lobby session {target}"))?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            event = events.recv() => {
                match event {
                    Some(event) => render_event(&session, event).await?,
                    None => break,
                }
            }
            signal = signals.recv() => {
                if !handle_signal(signal).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, &session).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    shutdown_session(&session).await;
    Ok(())
}

/// Closes the session and waits briefly for the close frame to go out.
pub async fn shutdown_session(session: &LobbySession) -> SessionState {
    session.close();
    match timeout(CLOSE_GRACE, session.closed()).await {
        Ok(state) => state,
        Err(_) => {
            warn!("lobby connection did not close in time");
            session.state()
        }
    }
}

fn forward_events(session: &LobbySession, events: mpsc::UnboundedSender<ServerToClient>) {
    let lobby_events = events.clone();
    let _ = session.subscribe(move |packet: &LobbyPacket| {
        let _ = lobby_events.send(ServerToClient::Lobby(packet.clone()));
    });
    let _ = session.subscribe(move |packet: &GameStartedPacket| {
        let _ = events.send(ServerToClient::GameStarted(packet.clone()));
    });
}

async fn handle_signal(signal: Result<SessionSignal, broadcast::error::RecvError>) -> Result<bool> {
    match signal {
        Ok(SessionSignal::FrameDropped(error)) => {
            write_stderr(&format!("!!! dropped frame: {error}")).await?;
            Ok(true)
        }
        Ok(SessionSignal::Closed { reason: Some(error) }) => {
            write_stdout(&format!("*** lobby connection closed: {error}")).await?;
            Ok(false)
        }
        Ok(SessionSignal::Closed { reason: None }) => {
            write_stdout("*** lobby connection closed").await?;
            Ok(false)
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "missed session signals");
            Ok(true)
        }
        Err(broadcast::error::RecvError::Closed) => Ok(false),
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    session: &LobbySession,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    let text = input.trim();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving lobby").await?;
        return Ok(false);
    }

    if text.eq_ignore_ascii_case("start") {
        session.start_game()?;
        return Ok(true);
    }

    write_stderr(&format!("!!! unknown command '{text}'; try 'start' or '/quit'")).await?;
    Ok(true)
}

async fn render_event(session: &LobbySession, event: ServerToClient) -> io::Result<()> {
    match event {
        ServerToClient::Lobby(_) => match session.current_snapshot() {
            Ok(snapshot) => write_stdout(&describe_lobby(&snapshot)).await,
            Err(error) => write_stderr(&format!("!!! {error}")).await,
        },
        ServerToClient::GameStarted(started) => {
            let challenge = started.challenge.id().unwrap_or("unnamed");
            write_stdout(&format!(
                "*** game started at {} (challenge {challenge})",
                started.start_time
            ))
            .await
        }
    }
}

fn describe_lobby(snapshot: &LobbySnapshot) -> String {
    let mut users: Vec<&str> = snapshot
        .users
        .values()
        .map(|user| user.username.as_str())
        .collect();
    users.sort_unstable();

    let phase = match &snapshot.state {
        LobbyPhase::Waiting => "waiting".to_string(),
        LobbyPhase::InGame { start_time, .. } => format!("in game since {start_time}"),
    };

    format!(
        "*** lobby {} owned by {} ({phase}); users: {}",
        snapshot.id,
        snapshot.owner.username,
        users.join(", ")
    )
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::lobby::{LobbySettings, User, UserId};

    fn user(id: &str, username: &str) -> User {
        User {
            id: UserId::new(id),
            username: username.into(),
            email: None,
            image_url: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn describes_waiting_lobby_with_sorted_users() {
        let owner = user("U1", "carol");
        let snapshot = LobbySnapshot {
            id: "L1".into(),
            settings: LobbySettings::default(),
            owner: owner.clone(),
            users: HashMap::from([
                (owner.id.clone(), owner),
                (UserId::new("U2"), user("U2", "alice")),
            ]),
            state: LobbyPhase::Waiting,
        };

        assert_eq!(
            describe_lobby(&snapshot),
            "*** lobby L1 owned by carol (waiting); users: alice, carol"
        );
    }
}
