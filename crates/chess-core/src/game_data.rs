use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::moves::{Move, MoveLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Active,
    Finished,
}

/// Move as exchanged with the game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveDto {
    pub move_number: u32,
    pub from_square: String,
    pub to_square: String,
    #[serde(default)]
    pub piece: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

impl MoveDto {
    pub fn to_move(&self) -> Result<Move, CoreError> {
        Move::new(
            self.move_number,
            &self.from_square,
            &self.to_square,
            self.piece.as_deref(),
            self.promotion.as_deref(),
        )
    }
}

impl From<&Move> for MoveDto {
    fn from(mv: &Move) -> Self {
        Self {
            move_number: mv.sequence,
            from_square: mv.from.to_string(),
            to_square: mv.to.to_string(),
            piece: Some(mv.piece.to_string()),
            promotion: mv.promotion.map(|p| p.to_string()),
        }
    }
}

/// Full game as returned by `GET /games/{id}` (and, in summary form, by the
/// active/history listings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDto {
    pub id: i64,
    #[serde(default)]
    pub white_username: Option<String>,
    #[serde(default)]
    pub black_username: Option<String>,
    pub status: GameStatus,
    #[serde(default)]
    pub winner_username: Option<String>,
    #[serde(default)]
    pub moves: Option<Vec<MoveDto>>,
    #[serde(default)]
    pub fen: Option<String>,
    #[serde(default)]
    pub white_remaining_seconds: Option<i64>,
    #[serde(default)]
    pub black_remaining_seconds: Option<i64>,
    #[serde(default)]
    pub turn_started_at_epoch_ms: Option<i64>,
}

impl GameDto {
    pub fn move_count(&self) -> usize {
        self.moves.as_ref().map_or(0, Vec::len)
    }
}

/// Client-side view of one game, as of the last reconciliation with the server.
#[derive(Debug, Clone, PartialEq)]
pub struct GameState {
    pub id: i64,
    pub white: Option<String>,
    pub black: Option<String>,
    pub status: GameStatus,
    pub winner: Option<String>,
    pub moves: MoveLog,
    pub white_remaining: Option<i64>,
    pub black_remaining: Option<i64>,
    /// Wall-clock time the remaining-seconds snapshot was taken.
    pub synced_at: DateTime<Utc>,
}

impl GameState {
    pub fn from_dto(dto: &GameDto, synced_at: DateTime<Utc>) -> Result<Self, CoreError> {
        let moves = dto
            .moves
            .iter()
            .flatten()
            .map(MoveDto::to_move)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: dto.id,
            white: dto.white_username.clone(),
            black: dto.black_username.clone(),
            status: dto.status,
            winner: non_empty(dto.winner_username.clone()),
            moves: MoveLog::from_moves(moves),
            white_remaining: dto.white_remaining_seconds,
            black_remaining: dto.black_remaining_seconds,
            synced_at,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.status == GameStatus::Finished
    }

    /// Take status, winner, identities and clocks from `dto`, leaving the move log alone.
    pub fn adopt_summary(&mut self, dto: &GameDto) {
        self.white = dto.white_username.clone().or(self.white.take());
        self.black = dto.black_username.clone().or(self.black.take());
        self.status = dto.status;
        self.winner = non_empty(dto.winner_username.clone());
        self.white_remaining = dto.white_remaining_seconds;
        self.black_remaining = dto.black_remaining_seconds;
    }

    pub fn finish(&mut self, winner: Option<String>) {
        self.status = GameStatus::Finished;
        self.winner = non_empty(winner);
    }

    /// The other player's name, compared case-insensitively.
    pub fn opponent_of(&self, username: &str) -> Option<&str> {
        let is_white = self
            .white
            .as_deref()
            .is_some_and(|w| w.eq_ignore_ascii_case(username));
        if is_white {
            self.black.as_deref()
        } else {
            self.white.as_deref()
        }
    }
}

fn non_empty(name: Option<String>) -> Option<String> {
    name.filter(|n| !n.trim().is_empty())
}
