//! Remaining-time estimation between server snapshots.
//!
//! The server reports each side's remaining seconds at sync time. Between
//! syncs only the side to move loses time, at wall-clock rate.

use chrono::{DateTime, Utc};
use shakmaty::Color;

use crate::game_data::{GameState, GameStatus};
use crate::moves::side_to_move;

pub const DEFAULT_CLOCK_SECONDS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDisplay {
    pub white_seconds: i64,
    pub black_seconds: i64,
    /// The side whose clock is counting down, if the game is still active.
    pub running: Option<Color>,
}

impl ClockDisplay {
    pub fn seconds(&self, color: Color) -> i64 {
        match color {
            Color::White => self.white_seconds,
            Color::Black => self.black_seconds,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClockEstimator {
    default_seconds: i64,
}

impl Default for ClockEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK_SECONDS)
    }
}

impl ClockEstimator {
    /// `default_seconds` is used for a side the server did not report.
    pub fn new(default_seconds: i64) -> Self {
        Self { default_seconds }
    }

    pub fn estimate(&self, state: &GameState, now: DateTime<Utc>) -> ClockDisplay {
        let white = state.white_remaining.unwrap_or(self.default_seconds);
        let black = state.black_remaining.unwrap_or(self.default_seconds);

        if state.status != GameStatus::Active {
            return ClockDisplay {
                white_seconds: white,
                black_seconds: black,
                running: None,
            };
        }

        let elapsed = (now.timestamp() - state.synced_at.timestamp()).max(0);
        let to_move = side_to_move(state.moves.len());
        let (white_seconds, black_seconds) = match to_move {
            Color::White => ((white - elapsed).max(0), black),
            Color::Black => (white, (black - elapsed).max(0)),
        };

        ClockDisplay {
            white_seconds,
            black_seconds,
            running: Some(to_move),
        }
    }
}

/// `m:ss`, e.g. `9:05`.
pub fn format_clock(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
