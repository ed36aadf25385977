//! Moves and the ordered, deduplicated move log.

use std::fmt;

use shakmaty::{Color, Square};

use crate::error::CoreError;

/// A single half-move as recorded by the game server.
///
/// Identity for deduplication is `(sequence, from, to)`; piece and promotion
/// letters are carried along but never compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    /// 1-based sequence number.
    pub sequence: u32,
    pub from: Square,
    pub to: Square,
    /// Piece letter as reported by the mover (`P`, `N`, ... or lowercase).
    pub piece: char,
    pub promotion: Option<char>,
}

impl Move {
    /// Build a move from square names like `"e2"`.
    pub fn new(
        sequence: u32,
        from: &str,
        to: &str,
        piece: Option<&str>,
        promotion: Option<&str>,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            sequence,
            from: parse_square(from)?,
            to: parse_square(to)?,
            piece: piece.and_then(|p| p.trim().chars().next()).unwrap_or('P'),
            promotion: promotion.and_then(|p| p.trim().chars().next()),
        })
    }

    pub fn identity(&self) -> (u32, Square, Square) {
        (self.sequence, self.from, self.to)
    }

    pub fn same_identity(&self, other: &Move) -> bool {
        self.identity() == other.identity()
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)?;
        if let Some(p) = self.promotion {
            write!(f, "={p}")?;
        }
        Ok(())
    }
}

/// Parse a square name (`a1`..`h8`).
pub fn parse_square(name: &str) -> Result<Square, CoreError> {
    name.trim()
        .parse::<Square>()
        .map_err(|_| CoreError::InvalidSquare(name.to_string()))
}

/// Side to move after `count` half-moves from the initial position.
pub fn side_to_move(count: usize) -> Color {
    if count % 2 == 0 {
        Color::White
    } else {
        Color::Black
    }
}

/// Ordered record of moves, unique by identity, sorted by sequence number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveLog {
    moves: Vec<Move>,
}

impl MoveLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from moves in any order, dropping duplicate identities.
    pub fn from_moves<I: IntoIterator<Item = Move>>(moves: I) -> Self {
        let mut log = Self::new();
        for mv in moves {
            log.merge(mv);
        }
        log
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn as_slice(&self) -> &[Move] {
        &self.moves
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Move> {
        self.moves.iter()
    }

    pub fn last(&self) -> Option<&Move> {
        self.moves.last()
    }

    pub fn contains(&self, mv: &Move) -> bool {
        self.moves.iter().any(|m| m.same_identity(mv))
    }

    /// Insert `mv` unless a move with the same identity is already present.
    /// Returns whether the log changed.
    ///
    /// Moves sharing a sequence number but not an identity are kept in arrival
    /// order after the existing ones.
    pub fn merge(&mut self, mv: Move) -> bool {
        if self.contains(&mv) {
            return false;
        }
        let at = self.moves.partition_point(|m| m.sequence <= mv.sequence);
        self.moves.insert(at, mv);
        true
    }

    /// Sequence number the next locally played move receives.
    pub fn next_sequence(&self) -> u32 {
        self.moves.len() as u32 + 1
    }

    /// Append a locally originated move with the next sequence number.
    pub fn push_optimistic(
        &mut self,
        from: Square,
        to: Square,
        piece: char,
        promotion: Option<char>,
    ) -> &Move {
        let mv = Move {
            sequence: self.next_sequence(),
            from,
            to,
            piece,
            promotion,
        };
        self.moves.push(mv);
        &self.moves[self.moves.len() - 1]
    }

    /// Replace the whole log, e.g. with the server's authoritative copy.
    pub fn replace(&mut self, other: MoveLog) {
        self.moves = other.moves;
    }

    /// True when sequence numbers run 1..=len without gaps or repeats.
    pub fn is_contiguous(&self) -> bool {
        self.moves
            .iter()
            .enumerate()
            .all(|(i, m)| m.sequence as usize == i + 1)
    }

    pub fn side_to_move(&self) -> Color {
        side_to_move(self.moves.len())
    }
}

impl<'a> IntoIterator for &'a MoveLog {
    type Item = &'a Move;
    type IntoIter = std::slice::Iter<'a, Move>;

    fn into_iter(self) -> Self::IntoIter {
        self.moves.iter()
    }
}
