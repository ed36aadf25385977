//! Async driver: executes coordinator effects and feeds every event source
//! back into the coordinators, one reaction at a time.
//!
//! Runs on a single-threaded runtime. HTTP requests are spawned and report
//! back as [`Completion`]s; a 401 from any request clears the session and
//! closes the push channel.

use chess_core::GameDto;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{SharedConnection, TransportEvent};
use crate::clients::{ApiClient, PendingInvitation};
use crate::error::{ClientError, Result};
use crate::lobby::{LobbyCoordinator, LobbyEffect};
use crate::scheduler::{Timer, TokioScheduler};
use crate::session::SharedSession;
use crate::sync::{Effect, FetchPurpose, SyncCoordinator, Ticket};

#[derive(Debug)]
pub enum Completion {
    Game {
        ticket: Ticket,
        purpose: FetchPurpose,
        result: Result<GameDto>,
    },
    Resigned {
        ticket: Ticket,
        result: Result<()>,
    },
    ActiveGames {
        ticket: Ticket,
        result: Result<Vec<GameDto>>,
    },
    History {
        ticket: Ticket,
        result: Result<Vec<GameDto>>,
    },
    PendingInvitation {
        ticket: Ticket,
        result: Result<PendingInvitation>,
    },
}

impl Completion {
    fn error(&self) -> Option<&ClientError> {
        match self {
            Completion::Game { result, .. } => result.as_ref().err(),
            Completion::Resigned { result, .. } => result.as_ref().err(),
            Completion::ActiveGames { result, .. } | Completion::History { result, .. } => {
                result.as_ref().err()
            }
            Completion::PendingInvitation { result, .. } => result.as_ref().err(),
        }
    }
}

/// User input while a game is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameCommand {
    Move {
        from: String,
        to: String,
        promotion: Option<String>,
    },
    Back,
    Forward,
    Start,
    End,
    Resign,
    Quit,
}

impl GameCommand {
    /// `e2e4`, `e7e8q`, `back`, `fwd`, `start`, `end`, `resign`, `quit`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim().to_ascii_lowercase();
        Some(match line.as_str() {
            "back" | "b" => GameCommand::Back,
            "fwd" | "f" => GameCommand::Forward,
            "start" => GameCommand::Start,
            "end" | "live" => GameCommand::End,
            "resign" => GameCommand::Resign,
            "quit" | "q" => GameCommand::Quit,
            mv if (mv.len() == 4 || mv.len() == 5) && mv.is_ascii() => GameCommand::Move {
                from: mv[0..2].to_string(),
                to: mv[2..4].to_string(),
                promotion: mv.get(4..5).map(str::to_string),
            },
            _ => return None,
        })
    }
}

/// User input in the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyCommand {
    Invite(String),
    Accept,
    Decline,
    Open(i64),
    Refresh,
    Quit,
}

impl LobbyCommand {
    /// `invite <user>`, `accept`, `decline`, `open <id>`, `refresh`, `quit`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next()?.to_ascii_lowercase();
        let arg = parts.next();
        Some(match (verb.as_str(), arg) {
            ("invite", Some(user)) => LobbyCommand::Invite(user.to_string()),
            ("accept", None) => LobbyCommand::Accept,
            ("decline", None) => LobbyCommand::Decline,
            ("open", Some(id)) => LobbyCommand::Open(id.parse().ok()?),
            ("refresh", None) => LobbyCommand::Refresh,
            ("quit" | "q", None) => LobbyCommand::Quit,
            _ => return None,
        })
    }
}

pub struct Runtime {
    api: ApiClient,
    session: SharedSession,
    conn: SharedConnection,
    scheduler: TokioScheduler,
    timers: mpsc::UnboundedReceiver<Timer>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
}

impl Runtime {
    /// Must be called from within a tokio runtime.
    pub fn new(
        api: ApiClient,
        session: SharedSession,
        conn: SharedConnection,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        let (scheduler, timers) = TokioScheduler::new();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        Self {
            api,
            session,
            conn,
            scheduler,
            timers,
            transport_events,
            completions_tx,
            completions,
        }
    }

    /// Drive one game view until the user quits or every input closes.
    pub async fn run_game(
        &mut self,
        coord: &mut SyncCoordinator,
        commands: &mut mpsc::UnboundedReceiver<GameCommand>,
    ) -> Result<()> {
        coord.activate(&mut self.scheduler, Utc::now());

        loop {
            for effect in coord.take_effects() {
                self.execute(effect);
            }

            tokio::select! {
                Some(event) = self.transport_events.recv() => {
                    let before = self.conn.borrow().state();
                    let deliveries = self.conn.borrow_mut().handle(event);
                    let now = Utc::now();
                    if self.conn.borrow().state() != before {
                        coord.on_connection_changed(now);
                    }
                    for delivery in &deliveries {
                        coord.on_delivery(delivery, now);
                    }
                }
                Some(timer) = self.timers.recv() => {
                    coord.on_timer(timer, Utc::now());
                }
                Some(completion) = self.completions.recv() => {
                    self.escalate_auth(&completion);
                    let now = Utc::now();
                    match completion {
                        Completion::Game { ticket, purpose, result } => {
                            coord.on_game_fetched(ticket, purpose, result, now);
                        }
                        Completion::Resigned { ticket, result } => {
                            coord.on_resigned(ticket, result, now);
                        }
                        other => debug!(?other, "Ignoring lobby completion in game view"),
                    }
                    coord.on_connection_changed(now);
                }
                command = commands.recv() => {
                    let now = Utc::now();
                    match command {
                        None | Some(GameCommand::Quit) => break,
                        Some(GameCommand::Move { from, to, promotion }) => {
                            // Rejections are already reflected in the view.
                            let _ = coord.submit_move(&from, &to, promotion.as_deref(), now);
                        }
                        Some(GameCommand::Back) => coord.step_replay(-1, now),
                        Some(GameCommand::Forward) => coord.step_replay(1, now),
                        Some(GameCommand::Start) => coord.replay_to_start(now),
                        Some(GameCommand::End) => coord.replay_to_live(now),
                        Some(GameCommand::Resign) => {
                            if let Err(e) = coord.resign(now) {
                                info!(error = %e, "Cannot resign");
                            }
                        }
                    }
                }
            }
        }

        coord.teardown(&mut self.scheduler);
        Ok(())
    }

    /// Drive the lobby. Returns the game to open, if the user picked one.
    pub async fn run_lobby(
        &mut self,
        lobby: &mut LobbyCoordinator,
        commands: &mut mpsc::UnboundedReceiver<LobbyCommand>,
    ) -> Result<Option<i64>> {
        lobby.activate(&mut self.scheduler);

        let target = loop {
            for effect in lobby.take_effects() {
                self.execute_lobby(effect);
            }
            if let Some(game_id) = lobby.take_navigation() {
                break Some(game_id);
            }

            tokio::select! {
                Some(event) = self.transport_events.recv() => {
                    let before = self.conn.borrow().state();
                    let deliveries = self.conn.borrow_mut().handle(event);
                    if self.conn.borrow().state() != before {
                        lobby.on_connection_changed();
                    }
                    for delivery in &deliveries {
                        lobby.on_delivery(delivery);
                    }
                }
                Some(timer) = self.timers.recv() => lobby.on_timer(timer),
                Some(completion) = self.completions.recv() => {
                    self.escalate_auth(&completion);
                    match completion {
                        Completion::ActiveGames { ticket, result } => lobby.on_active_games(ticket, result),
                        Completion::History { ticket, result } => lobby.on_history(ticket, result),
                        Completion::PendingInvitation { ticket, result } => {
                            lobby.on_pending_invitation(ticket, result)
                        }
                        other => debug!(?other, "Ignoring game completion in lobby"),
                    }
                    lobby.on_connection_changed();
                }
                command = commands.recv() => match command {
                    None | Some(LobbyCommand::Quit) => break None,
                    Some(LobbyCommand::Invite(user)) => {
                        if !lobby.invite(&user) {
                            info!(%user, "Invite not sent");
                        }
                    }
                    Some(LobbyCommand::Accept) => {
                        lobby.accept();
                    }
                    Some(LobbyCommand::Decline) => {
                        lobby.decline();
                    }
                    Some(LobbyCommand::Open(game_id)) => lobby.open_game(game_id),
                    Some(LobbyCommand::Refresh) => lobby.refresh_lists(),
                },
            }
        };

        lobby.teardown(&mut self.scheduler);
        Ok(target)
    }

    fn authorized_api(&self) -> ApiClient {
        self.api.with_credential(self.session.borrow().credential())
    }

    fn execute(&self, effect: Effect) {
        let api = self.authorized_api();
        let tx = self.completions_tx.clone();
        match effect {
            Effect::FetchGame {
                ticket,
                game_id,
                purpose,
            } => {
                tokio::spawn(async move {
                    let result = api.get_game(game_id).await;
                    let _ = tx.send(Completion::Game {
                        ticket,
                        purpose,
                        result,
                    });
                });
            }
            Effect::Resign { ticket, game_id } => {
                tokio::spawn(async move {
                    let result = api.resign(game_id).await;
                    let _ = tx.send(Completion::Resigned { ticket, result });
                });
            }
        }
    }

    fn execute_lobby(&self, effect: LobbyEffect) {
        let api = self.authorized_api();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let completion = match effect {
                LobbyEffect::FetchActiveGames { ticket } => Completion::ActiveGames {
                    ticket,
                    result: api.active_games().await,
                },
                LobbyEffect::FetchHistory { ticket } => Completion::History {
                    ticket,
                    result: api.game_history().await,
                },
                LobbyEffect::FetchPendingInvitation { ticket } => Completion::PendingInvitation {
                    ticket,
                    result: api.pending_invitation().await,
                },
            };
            let _ = tx.send(completion);
        });
    }

    /// Hand authentication failures to the session and stop the channel.
    fn escalate_auth(&self, completion: &Completion) {
        let Some(error) = completion.error() else { return };
        if !error.is_auth_failure() {
            return;
        }
        if !self.session.borrow().is_logged_in() {
            return;
        }
        warn!("Server rejected the credential; signing out");
        if let Err(e) = self.session.borrow_mut().clear() {
            warn!(error = %e, "Failed to clear stored session");
        }
        self.conn.borrow_mut().disconnect();
    }
}
