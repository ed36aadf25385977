//! Per-game synchronization coordinator.
//!
//! One [`SyncCoordinator`] owns the move log, replay cursor and displayed
//! position of a single game view. It reacts to four kinds of events, each
//! processed synchronously and to completion:
//!
//! - push deliveries routed by the [`ConnectionManager`](crate::channel::ConnectionManager),
//! - fired timers (clock tick, game poll),
//! - completions of HTTP requests it asked for,
//! - local user input (moves, replay navigation, resignation).
//!
//! The coordinator performs no I/O itself. Requests are queued as [`Effect`]s
//! that the runtime executes; their results come back through
//! [`SyncCoordinator::on_game_fetched`] and [`SyncCoordinator::on_resigned`]
//! tagged with the [`Ticket`] they were issued under. Results for a torn
//! down coordinator are discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chess_core::moves::parse_square;
use chess_core::{
    apply, build, format_clock, ClockDisplay, ClockEstimator, Color, CoreError, GameDto,
    GameState, GameStatus, Move, MoveLog, Position, ReplayNavigator,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::channel::{
    normalize_move, ConnectionState, Delivery, GameEvent, MovePayload, Outbound, PushMessage,
    SharedConnection, SubscriberId, Topic,
};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::observers::{ObserverId, Observers};
use crate::scheduler::{Scheduler, Timer, TimerId};
use crate::session::SharedSession;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identity of one issued request: the coordinator instance that issued it
/// and a per-instance sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    owner: u64,
    seq: u64,
}

impl Ticket {
    pub(crate) fn issuer() -> TicketIssuer {
        TicketIssuer {
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            next: 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct TicketIssuer {
    owner: u64,
    next: u64,
}

impl TicketIssuer {
    pub(crate) fn issue(&mut self) -> Ticket {
        self.next += 1;
        Ticket {
            owner: self.owner,
            seq: self.next,
        }
    }

    pub(crate) fn owns(&self, ticket: Ticket) -> bool {
        ticket.owner == self.owner
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPurpose {
    /// First load on activation.
    Initial,
    /// Periodic reconciliation.
    Poll,
    /// Clock/summary refresh after a remote move was merged.
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchGame {
        ticket: Ticket,
        game_id: i64,
        purpose: FetchPurpose,
    },
    Resign {
        ticket: Ticket,
        game_id: i64,
    },
}

/// Plain state handed to the rendering layer after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct GameView {
    pub game_id: i64,
    pub loading: bool,
    pub not_found: bool,
    pub white: Option<String>,
    pub black: Option<String>,
    pub status: Option<GameStatus>,
    pub winner: Option<String>,
    /// Full board notation of the displayed (possibly historical) position.
    pub fen: String,
    pub moves: Vec<Move>,
    pub replay_index: usize,
    pub is_live: bool,
    /// Local user plays white (also assumed while white is unknown).
    pub is_white: bool,
    pub is_my_turn: bool,
    pub white_to_move: bool,
    pub clock: ClockDisplay,
    pub white_clock: String,
    pub black_clock: String,
    pub error: Option<String>,
    pub resigning: bool,
    pub connection: ConnectionState,
}

impl GameView {
    fn empty(game_id: i64, default_seconds: i64) -> Self {
        Self {
            game_id,
            loading: true,
            not_found: false,
            white: None,
            black: None,
            status: None,
            winner: None,
            fen: Position::initial().to_string(),
            moves: Vec::new(),
            replay_index: 0,
            is_live: true,
            is_white: true,
            is_my_turn: false,
            white_to_move: true,
            clock: ClockDisplay {
                white_seconds: default_seconds,
                black_seconds: default_seconds,
                running: None,
            },
            white_clock: format_clock(default_seconds),
            black_clock: format_clock(default_seconds),
            error: None,
            resigning: false,
            connection: ConnectionState::Disconnected,
        }
    }
}

pub struct SyncCoordinator {
    game_id: i64,
    conn: SharedConnection,
    session: SharedSession,
    subscriber: SubscriberId,
    tickets: TicketIssuer,
    clock: ClockEstimator,
    default_seconds: i64,
    poll_interval: Duration,
    initial_sync_delay: Duration,
    clock_tick: Duration,

    state: Option<GameState>,
    cursor: ReplayNavigator,
    /// Position at the cursor; recomputed in the same reaction as any log change.
    position: Position,
    loading: bool,
    not_found: bool,
    error: Option<String>,
    resigning: bool,
    poll_in_flight: bool,
    /// Sequence number of an optimistic move the channel dropped.
    unsent: Option<u32>,

    timers: Vec<TimerId>,
    effects: Vec<Effect>,
    active: bool,
    torn_down: bool,

    view: GameView,
    observers: Observers<GameView>,
}

impl SyncCoordinator {
    pub fn new(
        game_id: i64,
        conn: SharedConnection,
        session: SharedSession,
        config: &ClientConfig,
    ) -> Self {
        let subscriber = conn.borrow_mut().register();
        Self {
            game_id,
            conn,
            session,
            subscriber,
            tickets: Ticket::issuer(),
            clock: ClockEstimator::new(config.default_clock_seconds),
            default_seconds: config.default_clock_seconds,
            poll_interval: config.poll_interval,
            initial_sync_delay: config.initial_sync_delay,
            clock_tick: config.clock_tick,
            state: None,
            cursor: ReplayNavigator::default(),
            position: Position::initial(),
            loading: true,
            not_found: false,
            error: None,
            resigning: false,
            poll_in_flight: false,
            unsent: None,
            timers: Vec::new(),
            effects: Vec::new(),
            active: false,
            torn_down: false,
            view: GameView::empty(game_id, config.default_clock_seconds),
            observers: Observers::default(),
        }
    }

    pub fn game_id(&self) -> i64 {
        self.game_id
    }

    pub fn subscriber(&self) -> SubscriberId {
        self.subscriber
    }

    pub fn view(&self) -> &GameView {
        &self.view
    }

    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn move_log(&self) -> Option<&MoveLog> {
        self.state.as_ref().map(|s| &s.moves)
    }

    pub fn observe(&mut self, callback: impl FnMut(&GameView) + 'static) -> ObserverId {
        self.observers.register(callback)
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.observers.deregister(id)
    }

    /// Drain requests queued since the last call.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Connect the channel, fetch the game and start the clock/poll timers.
    pub fn activate(&mut self, scheduler: &mut dyn Scheduler, now: DateTime<Utc>) {
        if self.active || self.torn_down {
            return;
        }
        self.active = true;
        info!(game_id = self.game_id, "Activating game view");

        {
            let mut conn = self.conn.borrow_mut();
            conn.connect();
            conn.subscribe(Topic::Errors, self.subscriber);
        }
        self.queue_fetch(FetchPurpose::Initial);

        self.timers.push(scheduler.schedule_repeating(self.clock_tick, Timer::ClockTick));
        self.timers.push(scheduler.schedule_repeating(self.poll_interval, Timer::PollGame));
        self.timers.push(scheduler.schedule_once(self.initial_sync_delay, Timer::PollGame));
        self.refresh(now);
    }

    /// Stop timers, drop the game subscription and ignore any later results.
    pub fn teardown(&mut self, scheduler: &mut dyn Scheduler) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        for id in self.timers.drain(..) {
            scheduler.cancel(id);
        }
        self.conn.borrow_mut().unsubscribe_all(self.subscriber);
        self.effects.clear();
        info!(game_id = self.game_id, "Game view torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn on_timer(&mut self, timer: Timer, now: DateTime<Utc>) {
        if self.torn_down {
            return;
        }
        match timer {
            Timer::ClockTick => self.refresh(now),
            Timer::PollGame => self.poll(),
            Timer::PollInvitation => {}
        }
    }

    /// The connection manager changed state; only the view is affected.
    pub fn on_connection_changed(&mut self, now: DateTime<Utc>) {
        if !self.torn_down {
            self.refresh(now);
        }
    }

    fn poll(&mut self) {
        let Some(state) = &self.state else { return };
        if state.status != GameStatus::Active || self.poll_in_flight {
            return;
        }
        self.poll_in_flight = true;
        self.queue_fetch(FetchPurpose::Poll);
    }

    fn queue_fetch(&mut self, purpose: FetchPurpose) {
        let ticket = self.tickets.issue();
        debug!(game_id = self.game_id, ?purpose, "Queueing game fetch");
        self.effects.push(Effect::FetchGame {
            ticket,
            game_id: self.game_id,
            purpose,
        });
    }

    fn accepts(&self, ticket: Ticket) -> bool {
        !self.torn_down && self.tickets.owns(ticket)
    }

    pub fn on_game_fetched(
        &mut self,
        ticket: Ticket,
        purpose: FetchPurpose,
        result: Result<GameDto>,
        now: DateTime<Utc>,
    ) {
        if !self.accepts(ticket) {
            debug!(game_id = self.game_id, ?purpose, "Discarding stale fetch result");
            return;
        }
        if purpose == FetchPurpose::Poll {
            self.poll_in_flight = false;
        }
        match purpose {
            FetchPurpose::Initial => self.on_initial(result, now),
            FetchPurpose::Poll => match result {
                Ok(dto) => self.reconcile_poll(&dto, now),
                Err(e) => debug!(game_id = self.game_id, error = %e, "Poll failed; ignoring"),
            },
            FetchPurpose::Refresh => match result {
                Ok(dto) => self.reconcile_refresh(&dto, now),
                Err(e) => debug!(game_id = self.game_id, error = %e, "Refresh failed; ignoring"),
            },
        }
        self.refresh(now);
    }

    fn on_initial(&mut self, result: Result<GameDto>, now: DateTime<Utc>) {
        self.loading = false;
        let dto = match result {
            Ok(dto) => dto,
            Err(ClientError::NotFound(what)) => {
                info!(game_id = self.game_id, %what, "Game not found");
                self.not_found = true;
                return;
            }
            Err(e) => {
                warn!(game_id = self.game_id, error = %e, "Initial game fetch failed");
                return;
            }
        };

        let state = match GameState::from_dto(&dto, now) {
            Ok(state) => state,
            Err(e) => {
                warn!(game_id = self.game_id, error = %e, "Server sent an unreadable game");
                self.error = Some(ClientError::from(e).to_string());
                return;
            }
        };
        let position = match build(state.moves.as_slice(), state.moves.len()) {
            Ok(p) => p,
            Err(e) => {
                warn!(game_id = self.game_id, error = %e, "Server move log does not replay");
                self.error = Some(ClientError::from(e).to_string());
                return;
            }
        };

        info!(
            game_id = self.game_id,
            moves = state.moves.len(),
            status = ?state.status,
            "Game loaded"
        );
        self.cursor = ReplayNavigator::live(state.moves.len());
        self.position = position;
        self.state = Some(state);
        self.conn
            .borrow_mut()
            .subscribe(Topic::Game(self.game_id), self.subscriber);
    }

    /// Server log wins when it is longer; FINISHED is always adopted. An
    /// optimistic move that was never sent is dropped once the server shows
    /// it does not have it.
    fn reconcile_poll(&mut self, dto: &GameDto, now: DateTime<Utc>) {
        let Some(local_len) = self.state.as_ref().map(|s| s.moves.len()) else {
            return;
        };
        let unsent = self.unsent.take();
        if dto.move_count() > local_len {
            info!(
                game_id = self.game_id,
                local = local_len,
                server = dto.move_count(),
                "Poll found newer moves; adopting server log"
            );
            self.adopt_server_log(dto, now);
        } else if unsent.is_some_and(|seq| dto.move_count() < seq as usize) {
            info!(
                game_id = self.game_id,
                sequence = ?unsent,
                "Server never received optimistic move; discarding it"
            );
            self.adopt_server_log(dto, now);
        }
        if dto.status == GameStatus::Finished {
            if let Some(state) = self.state.as_mut() {
                if !state.is_finished() {
                    info!(game_id = self.game_id, "Poll reports game finished");
                }
                state.adopt_summary(dto);
                state.synced_at = now;
            }
        }
    }

    fn reconcile_refresh(&mut self, dto: &GameDto, now: DateTime<Utc>) {
        let Some(local_len) = self.state.as_ref().map(|s| s.moves.len()) else {
            return;
        };
        if dto.move_count() > local_len {
            self.adopt_server_log(dto, now);
        } else {
            self.adopt_summary_keeping_terminal(dto, now);
        }
    }

    fn adopt_summary_keeping_terminal(&mut self, dto: &GameDto, now: DateTime<Utc>) {
        let Some(state) = self.state.as_mut() else { return };
        let finished = state.is_finished().then(|| state.winner.clone());
        state.adopt_summary(dto);
        state.synced_at = now;
        if let Some(winner) = finished {
            if state.status != GameStatus::Finished {
                state.finish(winner);
            }
        }
    }

    /// Replace the local log with the server's in one step. A server log the
    /// reducer cannot replay is rejected.
    fn adopt_server_log(&mut self, dto: &GameDto, now: DateTime<Utc>) {
        let server = match GameState::from_dto(dto, now) {
            Ok(s) => s,
            Err(e) => {
                warn!(game_id = self.game_id, error = %e, "Ignoring unreadable server log");
                return;
            }
        };
        let len = server.moves.len();
        let (was_live, old_index) = match &self.state {
            Some(s) => (self.cursor.is_live(s.moves.len()), self.cursor.index()),
            None => (true, 0),
        };
        let target = if was_live { len } else { old_index.min(len) };
        let position = match replay_checked(&server.moves, target) {
            Ok(p) => p,
            Err(e) => {
                warn!(game_id = self.game_id, error = %e, "Server log does not replay; keeping local log");
                self.error = Some(ClientError::from(e).to_string());
                return;
            }
        };

        self.adopt_summary_keeping_terminal(dto, now);
        if let Some(state) = self.state.as_mut() {
            state.moves = server.moves;
        }
        self.cursor.follow(was_live, len);
        self.position = position;
    }

    pub fn on_delivery(&mut self, delivery: &Delivery, now: DateTime<Utc>) {
        if self.torn_down || delivery.subscriber != self.subscriber {
            return;
        }
        match &delivery.message {
            PushMessage::Game { game_id, event } if *game_id == self.game_id => match event {
                GameEvent::Move { payload } => {
                    let Some(mv) = payload.as_ref().and_then(normalize_move) else {
                        debug!(game_id = self.game_id, "Ignoring MOVE without a usable payload");
                        return;
                    };
                    self.merge_remote(mv);
                }
                GameEvent::GameOver { winner_username } => {
                    let Some(state) = self.state.as_mut() else { return };
                    info!(game_id = self.game_id, winner = ?winner_username, "Game over");
                    state.finish(winner_username.clone());
                    self.error = None;
                }
            },
            PushMessage::Error(err) => {
                if err.game_id == Some(self.game_id) {
                    info!(game_id = self.game_id, message = %err.message, "Server rejected an action");
                    self.error = Some(err.message.clone());
                } else {
                    debug!(game_id = ?err.game_id, "Ignoring error for another game");
                    return;
                }
            }
            _ => return,
        }
        self.refresh(now);
    }

    fn merge_remote(&mut self, mv: Move) {
        let Some(state) = self.state.as_mut() else {
            debug!(game_id = self.game_id, "Ignoring MOVE before the game is loaded");
            return;
        };
        if state.is_finished() {
            debug!(game_id = self.game_id, "Ignoring MOVE for a finished game");
            return;
        }

        let old_len = state.moves.len();
        let mut candidate = state.moves.clone();
        if !candidate.merge(mv.clone()) {
            debug!(game_id = self.game_id, %mv, sequence = mv.sequence, "Duplicate move ignored");
            return;
        }
        let was_live = self.cursor.is_live(old_len);
        let target = if was_live {
            candidate.len()
        } else {
            self.cursor.index()
        };
        let validated = replay_checked(&candidate, target);
        let position = match validated {
            Ok(p) => p,
            Err(e) => {
                warn!(game_id = self.game_id, %mv, error = %e, "Rejecting move that does not apply");
                self.error = Some(ClientError::IllegalMove(e).to_string());
                return;
            }
        };

        debug!(game_id = self.game_id, %mv, sequence = mv.sequence, "Merged remote move");
        state.moves = candidate;
        self.cursor.follow(was_live, state.moves.len());
        self.position = position;
        self.error = None;
        self.queue_fetch(FetchPurpose::Refresh);
    }

    /// Play a local move optimistically and publish it.
    ///
    /// Rejected without any state change when the game is not loaded or
    /// finished, when the cursor is not on the live position, when it is not
    /// the local user's turn, or when the move does not apply.
    pub fn submit_move(
        &mut self,
        from: &str,
        to: &str,
        promotion: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let outcome = self.try_submit(from, to, promotion);
        if let Err(e) = &outcome {
            info!(game_id = self.game_id, from, to, error = %e, "Local move rejected");
            self.error = Some(e.to_string());
        }
        self.refresh(now);
        outcome
    }

    fn try_submit(&mut self, from: &str, to: &str, promotion: Option<&str>) -> Result<()> {
        if self.torn_down {
            return Err(ClientError::GameNotLoaded);
        }
        let is_my_turn = self.is_my_turn();
        let Some(state) = self.state.as_mut() else {
            return Err(ClientError::GameNotLoaded);
        };
        if state.is_finished() {
            return Err(ClientError::GameFinished);
        }
        if !self.cursor.is_live(state.moves.len()) {
            return Err(ClientError::NotLive);
        }
        if !is_my_turn {
            return Err(ClientError::NotYourTurn);
        }

        let from = parse_square(from)?;
        let to = parse_square(to)?;
        let piece = self
            .position
            .piece_at(from)
            .ok_or_else(|| CoreError::IllegalMoveApplication(from.to_string()))?;
        let promotion = promotion.and_then(|p| p.trim().chars().next());
        let candidate = Move {
            sequence: state.moves.next_sequence(),
            from,
            to,
            piece: piece.char(),
            promotion,
        };
        let position = apply(&self.position, &candidate)?;

        let mv = state
            .moves
            .push_optimistic(from, to, candidate.piece, promotion)
            .clone();
        self.cursor.to_live(state.moves.len());
        self.position = position;
        self.error = None;
        debug!(game_id = self.game_id, %mv, sequence = mv.sequence, "Optimistic move applied");

        let sent = self.conn.borrow_mut().send(&Outbound::Move {
            game_id: self.game_id,
            payload: MovePayload::for_move(&mv),
        });
        if sent {
            self.unsent = None;
        } else {
            info!(game_id = self.game_id, %mv, "Move not sent while disconnected; next poll reconciles");
            self.unsent = Some(mv.sequence);
        }
        Ok(())
    }

    /// Ask the server to resign. Completion arrives via [`on_resigned`](Self::on_resigned).
    pub fn resign(&mut self, now: DateTime<Utc>) -> Result<()> {
        let Some(state) = &self.state else {
            return Err(ClientError::GameNotLoaded);
        };
        if state.is_finished() {
            return Err(ClientError::GameFinished);
        }
        if self.resigning || self.torn_down {
            return Ok(());
        }
        self.resigning = true;
        let ticket = self.tickets.issue();
        self.effects.push(Effect::Resign {
            ticket,
            game_id: self.game_id,
        });
        info!(game_id = self.game_id, "Resigning");
        self.refresh(now);
        Ok(())
    }

    pub fn on_resigned(&mut self, ticket: Ticket, result: Result<()>, now: DateTime<Utc>) {
        if !self.accepts(ticket) {
            return;
        }
        self.resigning = false;
        match result {
            Ok(()) => {
                let me = self.session.borrow().username().map(str::to_string);
                if let Some(state) = self.state.as_mut() {
                    let winner = me
                        .as_deref()
                        .and_then(|me| state.opponent_of(me))
                        .map(str::to_string);
                    info!(game_id = self.game_id, winner = ?winner, "Resigned");
                    state.finish(winner);
                }
            }
            Err(e) => warn!(game_id = self.game_id, error = %e, "Resign request failed"),
        }
        self.refresh(now);
    }

    /// Move the replay cursor to `index`, clamped to the log.
    pub fn set_replay(&mut self, index: i64, now: DateTime<Utc>) {
        let len = self.log_len();
        self.cursor.set(index, len);
        self.reposition(now);
    }

    pub fn step_replay(&mut self, delta: i64, now: DateTime<Utc>) {
        let len = self.log_len();
        self.cursor.step(delta, len);
        self.reposition(now);
    }

    pub fn replay_to_start(&mut self, now: DateTime<Utc>) {
        self.set_replay(0, now);
    }

    pub fn replay_to_live(&mut self, now: DateTime<Utc>) {
        let len = self.log_len();
        self.set_replay(len as i64, now);
    }

    fn reposition(&mut self, now: DateTime<Utc>) {
        if let Some(state) = &self.state {
            // Every prefix of a stored log has been replayed successfully.
            match build(state.moves.as_slice(), self.cursor.index()) {
                Ok(p) => self.position = p,
                Err(e) => warn!(game_id = self.game_id, error = %e, "Replay position failed"),
            }
        }
        self.refresh(now);
    }

    fn log_len(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.moves.len())
    }

    fn is_white(&self) -> bool {
        let Some(white) = self.state.as_ref().and_then(|s| s.white.as_deref()) else {
            return true;
        };
        self.session
            .borrow()
            .username()
            .is_some_and(|me| white.eq_ignore_ascii_case(me))
    }

    fn is_my_turn(&self) -> bool {
        let Some(state) = &self.state else {
            return false;
        };
        if state.is_finished() || !self.cursor.is_live(state.moves.len()) {
            return false;
        }
        let white_to_move = state.moves.side_to_move() == Color::White;
        self.is_white() == white_to_move
    }

    /// Recompute the view and notify observers when it changed.
    fn refresh(&mut self, now: DateTime<Utc>) {
        let view = self.compute_view(now);
        if view != self.view {
            self.view = view;
            self.observers.notify(&self.view);
        }
    }

    fn compute_view(&self, now: DateTime<Utc>) -> GameView {
        let connection = self.conn.borrow().state();
        let mut view = GameView::empty(self.game_id, self.default_seconds);
        view.loading = self.loading;
        view.not_found = self.not_found;
        view.error = self.error.clone();
        view.resigning = self.resigning;
        view.connection = connection;
        view.is_white = self.is_white();

        let Some(state) = &self.state else {
            return view;
        };
        let clock = self.clock.estimate(state, now);
        view.white = state.white.clone();
        view.black = state.black.clone();
        view.status = Some(state.status);
        view.winner = state.winner.clone();
        view.fen = self.position.to_string();
        view.moves = state.moves.as_slice().to_vec();
        view.replay_index = self.cursor.index();
        view.is_live = self.cursor.is_live(state.moves.len());
        view.white_to_move = state.moves.side_to_move() == Color::White;
        view.is_my_turn = self.is_my_turn();
        view.white_clock = format_clock(clock.white_seconds);
        view.black_clock = format_clock(clock.black_seconds);
        view.clock = clock;
        view
    }
}

/// Position after `target` moves, once the whole log is known to replay.
fn replay_checked(log: &MoveLog, target: usize) -> Result<Position, CoreError> {
    let live = build(log.as_slice(), log.len())?;
    if target >= log.len() {
        Ok(live)
    } else {
        build(log.as_slice(), target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ConnectionManager, TransportEvent};
    use crate::channel::transport::ChannelTransport;
    use crate::scheduler::VirtualScheduler;
    use crate::session::Session;
    use chess_core::{MoveDto, INITIAL_FEN};
    use chrono::TimeZone;
    use serde_json::json;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn dto(moves: &[(u32, &str, &str)], status: GameStatus) -> GameDto {
        GameDto {
            id: 7,
            white_username: Some("alice".into()),
            black_username: Some("bob".into()),
            status,
            winner_username: None,
            moves: Some(
                moves
                    .iter()
                    .map(|(n, f, to)| MoveDto {
                        move_number: *n,
                        from_square: f.to_string(),
                        to_square: to.to_string(),
                        piece: None,
                        promotion: None,
                    })
                    .collect(),
            ),
            fen: None,
            white_remaining_seconds: Some(600),
            black_remaining_seconds: Some(600),
            turn_started_at_epoch_ms: None,
        }
    }

    fn setup(me: &str) -> (SyncCoordinator, VirtualScheduler, SharedConnection) {
        let (transport, _rx) = ChannelTransport::new();
        let session = Session::with_credential("tok", me, None).shared();
        let conn = ConnectionManager::new(Box::new(transport), session.clone()).shared();
        let coord = SyncCoordinator::new(7, conn.clone(), session, &ClientConfig::default());
        (coord, VirtualScheduler::new(), conn)
    }

    fn load(coord: &mut SyncCoordinator, sched: &mut VirtualScheduler, game: GameDto) {
        coord.activate(sched, t(0));
        let effects = coord.take_effects();
        let Effect::FetchGame { ticket, purpose, .. } = effects[0] else {
            panic!("expected initial fetch");
        };
        assert_eq!(purpose, FetchPurpose::Initial);
        coord.on_game_fetched(ticket, purpose, Ok(game), t(0));
    }

    fn game_delivery(coord: &SyncCoordinator, event: serde_json::Value) -> Delivery {
        Delivery {
            subscriber: coord.subscriber(),
            topic: Topic::Game(7),
            message: PushMessage::decode(&Topic::Game(7), &event).unwrap(),
        }
    }

    #[test]
    fn test_activation_queues_fetch_and_timers() {
        let (mut coord, mut sched, _) = setup("alice");
        coord.activate(&mut sched, t(0));
        assert_eq!(sched.active(), 3);
        assert!(coord.view().loading);
        assert_eq!(coord.take_effects().len(), 1);
        // Second activation is a no-op.
        coord.activate(&mut sched, t(0));
        assert!(coord.take_effects().is_empty());
    }

    #[test]
    fn test_initial_load_sets_live_position() {
        let (mut coord, mut sched, _) = setup("alice");
        load(&mut coord, &mut sched, dto(&[(1, "e2", "e4")], GameStatus::Active));
        let view = coord.view();
        assert!(!view.loading);
        assert_eq!(view.replay_index, 1);
        assert!(view.is_live);
        assert!(!view.white_to_move);
        assert!(view.is_white);
        assert!(!view.is_my_turn);
        assert_ne!(view.fen, INITIAL_FEN);
    }

    #[test]
    fn test_not_found() {
        let (mut coord, mut sched, _) = setup("alice");
        coord.activate(&mut sched, t(0));
        let Effect::FetchGame { ticket, purpose, .. } = coord.take_effects()[0] else {
            panic!()
        };
        coord.on_game_fetched(ticket, purpose, Err(ClientError::NotFound("Game 7".into())), t(0));
        assert!(coord.view().not_found);
        assert!(!coord.view().loading);
    }

    #[test]
    fn test_remote_move_advances_live_cursor() {
        let (mut coord, mut sched, _) = setup("alice");
        load(
            &mut coord,
            &mut sched,
            dto(&[(1, "e2", "e4"), (2, "e7", "e5")], GameStatus::Active),
        );
        let d = game_delivery(
            &coord,
            json!({"type": "MOVE", "move": {"moveNumber": 3, "fromSquare": "g1", "toSquare": "f3", "piece": "N"}}),
        );
        coord.on_delivery(&d, t(1));
        assert_eq!(coord.view().moves.len(), 3);
        assert_eq!(coord.view().replay_index, 3);
        assert!(matches!(
            coord.take_effects().as_slice(),
            [Effect::FetchGame {
                purpose: FetchPurpose::Refresh,
                ..
            }]
        ));

        // Echo of the same move changes nothing and issues no refresh.
        coord.on_delivery(&d, t(1));
        assert_eq!(coord.view().moves.len(), 3);
        assert!(coord.take_effects().is_empty());
    }

    #[test]
    fn test_remote_move_keeps_historical_cursor() {
        let (mut coord, mut sched, _) = setup("alice");
        load(
            &mut coord,
            &mut sched,
            dto(&[(1, "e2", "e4"), (2, "e7", "e5")], GameStatus::Active),
        );
        coord.set_replay(1, t(1));
        let fen_before = coord.view().fen.clone();
        let d = game_delivery(
            &coord,
            json!({"type": "MOVE", "move": {"moveNumber": 3, "fromSquare": "g1", "toSquare": "f3"}}),
        );
        coord.on_delivery(&d, t(1));
        assert_eq!(coord.view().replay_index, 1);
        assert!(!coord.view().is_live);
        assert_eq!(coord.view().fen, fen_before);
    }

    #[test]
    fn test_remote_move_from_empty_square_is_rejected() {
        let (mut coord, mut sched, _) = setup("alice");
        load(&mut coord, &mut sched, dto(&[], GameStatus::Active));
        let d = game_delivery(
            &coord,
            json!({"type": "MOVE", "move": {"moveNumber": 1, "fromSquare": "e4", "toSquare": "e5"}}),
        );
        coord.on_delivery(&d, t(1));
        assert!(coord.view().moves.is_empty());
        assert!(coord.view().error.as_deref().unwrap().starts_with("Illegal move"));
    }

    #[test]
    fn test_submit_move_rejections() {
        let (mut coord, mut sched, _) = setup("bob");
        assert!(matches!(
            coord.submit_move("e2", "e4", None, t(0)),
            Err(ClientError::GameNotLoaded)
        ));
        load(&mut coord, &mut sched, dto(&[], GameStatus::Active));
        // bob plays black; white to move.
        assert!(matches!(
            coord.submit_move("e2", "e4", None, t(0)),
            Err(ClientError::NotYourTurn)
        ));
        assert_eq!(coord.view().error.as_deref(), Some("Not your turn"));
        assert!(coord.view().moves.is_empty());
    }

    #[test]
    fn test_submit_move_requires_live_cursor() {
        let (mut coord, mut sched, _) = setup("alice");
        load(
            &mut coord,
            &mut sched,
            dto(&[(1, "e2", "e4"), (2, "e7", "e5")], GameStatus::Active),
        );
        assert!(coord.view().is_my_turn);
        coord.step_replay(-1, t(1));
        assert!(!coord.view().is_my_turn);
        assert!(matches!(
            coord.submit_move("g1", "f3", None, t(1)),
            Err(ClientError::NotLive)
        ));
        assert_eq!(coord.view().moves.len(), 2);
    }

    #[test]
    fn test_optimistic_move_applies_immediately() {
        let (mut coord, mut sched, conn) = setup("alice");
        load(&mut coord, &mut sched, dto(&[], GameStatus::Active));
        coord.submit_move("e2", "e4", None, t(1)).unwrap();
        let view = coord.view();
        assert_eq!(view.moves.len(), 1);
        assert_eq!(view.moves[0].sequence, 1);
        assert_eq!(view.moves[0].piece, 'P');
        assert_eq!(view.replay_index, 1);
        assert!(!view.is_my_turn);
        // Channel never opened, so the send was dropped.
        assert!(!conn.borrow().is_connected());
    }

    #[test]
    fn test_game_over_is_terminal() {
        let (mut coord, mut sched, _) = setup("alice");
        load(&mut coord, &mut sched, dto(&[], GameStatus::Active));
        let over = game_delivery(&coord, json!({"type": "GAME_OVER", "winnerUsername": "bob"}));
        coord.on_delivery(&over, t(5));
        assert_eq!(coord.view().status, Some(GameStatus::Finished));
        assert_eq!(coord.view().winner.as_deref(), Some("bob"));
        assert!(coord.view().clock.running.is_none());

        let mv = game_delivery(
            &coord,
            json!({"type": "MOVE", "move": {"moveNumber": 1, "fromSquare": "e2", "toSquare": "e4"}}),
        );
        coord.on_delivery(&mv, t(6));
        assert!(coord.view().moves.is_empty());

        coord.on_timer(Timer::PollGame, t(7));
        assert!(coord.take_effects().is_empty());
    }

    #[test]
    fn test_clock_tick_counts_down_side_to_move() {
        let (mut coord, mut sched, _) = setup("alice");
        load(&mut coord, &mut sched, dto(&[], GameStatus::Active));
        coord.on_timer(Timer::ClockTick, t(65));
        assert_eq!(coord.view().white_clock, "8:55");
        assert_eq!(coord.view().black_clock, "10:00");
        assert_eq!(coord.view().clock.running, Some(Color::White));
    }

    #[test]
    fn test_connection_state_in_view() {
        let (mut coord, mut sched, conn) = setup("alice");
        coord.activate(&mut sched, t(0));
        assert_eq!(coord.view().connection, ConnectionState::Connecting);
        conn.borrow_mut().handle(TransportEvent::Opened);
        coord.on_connection_changed(t(0));
        assert_eq!(coord.view().connection, ConnectionState::Connected);
    }

    #[test]
    fn test_observers_notified_on_change_only() {
        use std::cell::Cell;
        use std::rc::Rc;

        let (mut coord, mut sched, _) = setup("alice");
        let count = Rc::new(Cell::new(0));
        let seen = count.clone();
        let id = coord.observe(move |_| seen.set(seen.get() + 1));
        load(&mut coord, &mut sched, dto(&[], GameStatus::Active));
        let after_load = count.get();
        assert!(after_load >= 1);

        coord.on_timer(Timer::ClockTick, t(0));
        assert_eq!(count.get(), after_load);

        assert!(coord.unobserve(id));
        coord.on_timer(Timer::ClockTick, t(30));
        assert_eq!(count.get(), after_load);
    }
}
