//! Terminal chess client.
//!
//! `chess-client lobby` | `chess-client watch <game-id>` | `chess-client play <game-id>`

use std::env;

use anyhow::{bail, Context};
use chess_client::channel::{ChannelTransport, ConnectionManager, TransportCommand, TransportEvent};
use chess_client::runtime::{GameCommand, LobbyCommand, Runtime};
use chess_client::{ApiClient, ClientConfig, GameView, LobbyCoordinator, LobbyView, Session, SyncCoordinator};
use chess_core::GameStatus;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum Mode {
    Lobby,
    Watch(i64),
    Play(i64),
}

fn parse_mode() -> anyhow::Result<Mode> {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [] => Ok(Mode::Lobby),
        [cmd] if cmd == "lobby" => Ok(Mode::Lobby),
        [cmd, id] if cmd == "watch" || cmd == "play" => {
            let id: i64 = id.parse().with_context(|| format!("invalid game id {id:?}"))?;
            Ok(if cmd == "watch" { Mode::Watch(id) } else { Mode::Play(id) })
        }
        _ => bail!("usage: chess-client [lobby | watch <game-id> | play <game-id>]"),
    }
}

fn load_session(config: &ClientConfig) -> anyhow::Result<Session> {
    let mut session = match &config.session_file {
        Some(path) => Session::load(path)
            .with_context(|| format!("failed to read session file {}", path.display()))?,
        None => Session::new(),
    };
    if let (Ok(token), Ok(username)) = (env::var("CHESS_TOKEN"), env::var("CHESS_USERNAME")) {
        let user_id = env::var("CHESS_USER_ID").ok().and_then(|v| v.parse().ok());
        session.set(&token, &username, user_id)?;
    }
    Ok(session)
}

fn render_game(view: &GameView) {
    if view.loading {
        println!("Loading game {}...", view.game_id);
        return;
    }
    if view.not_found {
        println!("Game {} not found.", view.game_id);
        return;
    }
    let placement = view.fen.split(' ').next().unwrap_or_default();
    println!();
    for (i, rank) in placement.split('/').enumerate() {
        let mut row = String::new();
        for c in rank.chars() {
            match c.to_digit(10) {
                Some(n) => (0..n).for_each(|_| row.push_str(" .")),
                None => {
                    row.push(' ');
                    row.push(c);
                }
            }
        }
        println!("{} {}", 8 - i, row);
    }
    println!("   a b c d e f g h");
    println!(
        "White {} {}   Black {} {}",
        view.white.as_deref().unwrap_or("?"),
        view.white_clock,
        view.black.as_deref().unwrap_or("?"),
        view.black_clock,
    );
    let position = if view.is_live {
        "live".to_string()
    } else {
        format!("{}/{}", view.replay_index, view.moves.len())
    };
    match view.status {
        Some(GameStatus::Finished) => println!(
            "Game over, winner: {}  [{position}]",
            view.winner.as_deref().unwrap_or("none")
        ),
        _ => println!(
            "{} to move{}  [{position}]  channel {:?}",
            if view.white_to_move { "White" } else { "Black" },
            if view.is_my_turn { " (you)" } else { "" },
            view.connection,
        ),
    }
    if let Some(error) = &view.error {
        println!("! {error}");
    }
}

fn render_lobby(view: &LobbyView) {
    println!();
    println!("Online: {}", view.online.join(", "));
    if let Some(from) = &view.pending_invitation {
        println!("Invitation from {from} (accept / decline)");
    }
    if let Some(to) = &view.inviting {
        println!("Waiting for {to}...");
    }
    for game in &view.active_games {
        println!(
            "  #{} {} vs {}",
            game.id,
            game.white_username.as_deref().unwrap_or("?"),
            game.black_username.as_deref().unwrap_or("?")
        );
    }
    println!("{} finished games", view.history.len());
}

fn spawn_stdin() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Parses stdin lines into commands until the command receiver is dropped,
/// then hands the line stream back so the next view reads from it.
fn forward_commands<T: Send + 'static>(
    mut lines: mpsc::UnboundedReceiver<String>,
    parse: fn(&str) -> Option<T>,
    refuse: fn(&T) -> Option<&'static str>,
) -> (mpsc::UnboundedReceiver<T>, JoinHandle<mpsc::UnboundedReceiver<String>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                line = lines.recv() => {
                    let Some(line) = line else { break };
                    match parse(&line) {
                        Some(cmd) => match refuse(&cmd) {
                            Some(reason) => println!("{reason}"),
                            None => {
                                if tx.send(cmd).is_err() {
                                    break;
                                }
                            }
                        },
                        None if line.trim().is_empty() => {}
                        None => println!("? {}", line.trim()),
                    }
                }
            }
        }
        lines
    });
    (rx, handle)
}

fn accept_all<T>(_: &T) -> Option<&'static str> {
    None
}

fn refuse_moves(cmd: &GameCommand) -> Option<&'static str> {
    match cmd {
        GameCommand::Move { .. } | GameCommand::Resign => Some("Watching only; moves are disabled"),
        _ => None,
    }
}

/// Without a push transport a local move is never delivered, so the next
/// poll drops it again.
fn undelivered_moves_notice(watching: bool) -> Option<&'static str> {
    (!watching).then_some(
        "No push transport attached: moves you make are not delivered and the next poll drops them",
    )
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mode = parse_mode()?;
    let config = ClientConfig::from_env()?;
    info!(api_url = %config.api_url, "Client config loaded");

    let session = load_session(&config)?.shared();
    if !session.borrow().is_logged_in() {
        info!("No credential available; push channel stays closed");
    }

    let api = ApiClient::new(&config)?;

    // The wire transport is an external collaborator; without one the
    // client stays in sync through polling alone.
    let (transport, mut transport_commands) = ChannelTransport::new();
    let (_transport_events_tx, transport_events) = mpsc::unbounded_channel::<TransportEvent>();
    tokio::spawn(async move {
        while let Some(command) = transport_commands.recv().await {
            match command {
                TransportCommand::Publish { destination, .. } => {
                    debug!(%destination, "No push transport attached; publish not delivered")
                }
                other => debug!(?other, "No push transport attached"),
            }
        }
    });
    info!("Running poll-only: no push transport attached");

    let conn = ConnectionManager::new(Box::new(transport), session.clone()).shared();
    let mut runtime = Runtime::new(api, session.clone(), conn.clone(), transport_events);

    let mut lines = spawn_stdin();
    let game_id = match &mode {
        Mode::Watch(id) | Mode::Play(id) => *id,
        Mode::Lobby => {
            let mut lobby = LobbyCoordinator::new(conn.clone(), session.clone(), &config);
            lobby.observe(render_lobby);
            let (mut commands, reader) =
                forward_commands(lines, LobbyCommand::parse, accept_all::<LobbyCommand>);
            let next = runtime.run_lobby(&mut lobby, &mut commands).await?;
            drop(commands);
            lines = reader.await.context("stdin reader stopped")?;
            match next {
                Some(id) => id,
                None => return Ok(()),
            }
        }
    };

    let watching = matches!(mode, Mode::Watch(_));
    if let Some(notice) = undelivered_moves_notice(watching) {
        warn!(game_id, "{notice}");
        println!("! {notice}");
    }

    let mut coord = SyncCoordinator::new(game_id, conn.clone(), session.clone(), &config);
    let mut last_board = None;
    coord.observe(move |view: &GameView| {
        let key = (view.fen.clone(), view.status, view.error.clone(), view.loading);
        if last_board.as_ref() != Some(&key) {
            render_game(view);
            last_board = Some(key);
        }
    });

    let refuse: fn(&GameCommand) -> Option<&'static str> = if watching { refuse_moves } else { accept_all::<GameCommand> };
    let (mut commands, _reader) = forward_commands(lines, GameCommand::parse, refuse);

    runtime.run_game(&mut coord, &mut commands).await?;
    info!(game_id, "Bye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_line_after_lobby_reaches_game_view() {
        let (line_tx, lines) = mpsc::unbounded_channel();
        let (mut lobby, reader) =
            forward_commands(lines, LobbyCommand::parse, accept_all::<LobbyCommand>);

        line_tx.send("open 3".to_string()).unwrap();
        assert_eq!(lobby.recv().await, Some(LobbyCommand::Open(3)));
        drop(lobby);
        let lines = reader.await.unwrap();

        line_tx.send("e2e4".to_string()).unwrap();
        let (mut game, _reader) =
            forward_commands(lines, GameCommand::parse, accept_all::<GameCommand>);
        assert_eq!(
            game.recv().await,
            Some(GameCommand::Move {
                from: "e2".into(),
                to: "e4".into(),
                promotion: None
            })
        );
    }

    #[tokio::test]
    async fn test_watch_view_skips_moves() {
        let (line_tx, lines) = mpsc::unbounded_channel();
        let (mut game, _reader) = forward_commands(lines, GameCommand::parse, refuse_moves);

        line_tx.send("e2e4".to_string()).unwrap();
        line_tx.send("resign".to_string()).unwrap();
        line_tx.send("back".to_string()).unwrap();
        assert_eq!(game.recv().await, Some(GameCommand::Back));
    }

    #[test]
    fn test_play_mode_warns_about_undelivered_moves() {
        assert!(undelivered_moves_notice(false).is_some());
        assert!(undelivered_moves_notice(true).is_none());
    }
}
