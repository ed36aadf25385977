#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use chess_client::channel::{ConnectionManager, Transport, TransportCommand};
use chess_client::sync::{Effect, FetchPurpose};
use chess_client::{ClientConfig, Session, SharedConnection, SharedSession, SyncCoordinator};
use chess_client::scheduler::VirtualScheduler;
use chess_core::{GameDto, GameStatus, MoveDto};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

pub const GAME_ID: i64 = 7;

/// Transport that records every call instead of talking to a server.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub log: Rc<RefCell<Vec<TransportCommand>>>,
}

impl RecordingTransport {
    pub fn commands(&self) -> Vec<TransportCommand> {
        self.log.borrow().clone()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter_map(|c| match c {
                TransportCommand::Subscribe(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.log
            .borrow()
            .iter()
            .filter_map(|c| match c {
                TransportCommand::Publish { destination, body } => {
                    Some((destination.clone(), body.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

impl Transport for RecordingTransport {
    fn open(&mut self, credential: &str) {
        self.log.borrow_mut().push(TransportCommand::Open {
            credential: credential.to_string(),
        });
    }

    fn close(&mut self) {
        self.log.borrow_mut().push(TransportCommand::Close);
    }

    fn subscribe(&mut self, destination: &str) {
        self.log
            .borrow_mut()
            .push(TransportCommand::Subscribe(destination.to_string()));
    }

    fn unsubscribe(&mut self, destination: &str) {
        self.log
            .borrow_mut()
            .push(TransportCommand::Unsubscribe(destination.to_string()));
    }

    fn publish(&mut self, destination: &str, body: &Value) {
        self.log.borrow_mut().push(TransportCommand::Publish {
            destination: destination.to_string(),
            body: body.clone(),
        });
    }
}

/// Fixed wall-clock instant `secs` seconds into a test.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn session(username: &str) -> SharedSession {
    Session::with_credential("test-token", username, None).shared()
}

pub fn connection(session: &SharedSession) -> (SharedConnection, RecordingTransport) {
    let transport = RecordingTransport::default();
    let conn = ConnectionManager::new(Box::new(transport.clone()), session.clone()).shared();
    (conn, transport)
}

/// Server game with white `alice`, black `bob` and the given `(from, to)` moves.
pub fn game(moves: &[(&str, &str)]) -> GameDto {
    GameDto {
        id: GAME_ID,
        white_username: Some("alice".into()),
        black_username: Some("bob".into()),
        status: GameStatus::Active,
        winner_username: None,
        moves: Some(
            moves
                .iter()
                .enumerate()
                .map(|(i, (from, to))| MoveDto {
                    move_number: i as u32 + 1,
                    from_square: from.to_string(),
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

/// A coordinator for `GAME_ID` with virtual time and a recording transport.
pub struct Harness {
    pub coord: SyncCoordinator,
    pub scheduler: VirtualScheduler,
    pub conn: SharedConnection,
    pub transport: RecordingTransport,
    pub session: SharedSession,
}

impl Harness {
    pub fn new(username: &str) -> Self {
        let session = session(username);
        let (conn, transport) = connection(&session);
        let coord = SyncCoordinator::new(GAME_ID, conn.clone(), session.clone(), &ClientConfig::default());
        Self {
            coord,
            scheduler: VirtualScheduler::new(),
            conn,
            transport,
            session,
        }
    }

    /// Activate and answer the initial fetch with `dto`.
    pub fn load(username: &str, dto: GameDto) -> Self {
        let mut h = Self::new(username);
        h.coord.activate(&mut h.scheduler, at(0));
        let effect = h.coord.take_effects().remove(0);
        let Effect::FetchGame { ticket, purpose, .. } = effect else {
            panic!("expected initial fetch, got {effect:?}");
        };
        assert_eq!(purpose, FetchPurpose::Initial);
        h.coord.on_game_fetched(ticket, purpose, Ok(dto), at(0));
        h
    }

    /// Fire the poll timer and return the fetch it queued.
    pub fn poll(&mut self) -> Effect {
        self.coord.on_timer(chess_client::scheduler::Timer::PollGame, at(1));
        self.coord
            .take_effects()
            .into_iter()
            .find(|e| matches!(e, Effect::FetchGame { purpose: FetchPurpose::Poll, .. }))
            .expect("poll fetch queued")
    }

    /// Answer a fetch effect with `dto`.
    pub fn answer(&mut self, effect: Effect, dto: GameDto, now: DateTime<Utc>) {
        match effect {
            Effect::FetchGame { ticket, purpose, .. } => {
                self.coord.on_game_fetched(ticket, purpose, Ok(dto), now)
            }
            other => panic!("not a fetch: {other:?}"),
        }
    }

    pub fn sequences(&self) -> Vec<(u32, String, String)> {
        self.coord
            .view()
            .moves
            .iter()
            .map(|m| (m.sequence, m.from.to_string(), m.to.to_string()))
            .collect()
    }
}
