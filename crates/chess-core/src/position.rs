//! Board notation and the position reducer.
//!
//! Positions are derived purely from an ordered move log: `build` folds
//! `apply` over a prefix of the log starting from the standard initial
//! position. No legality checks happen here; any square-to-square move is
//! accepted as long as the origin holds a piece.

use std::fmt;
use std::str::FromStr;

use shakmaty::{Board, Color, File, Piece, Rank, Role, Square};

use crate::error::CoreError;
use crate::moves::Move;

pub const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Piece placement plus side to move. Castling rights and en passant target
/// are opaque pass-through strings; the move counters are reset to `0 1` by
/// every `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    board: Board,
    turn: Color,
    castling: String,
    en_passant: String,
    halfmove_clock: u32,
    fullmove_number: u32,
}

impl Position {
    pub fn initial() -> Self {
        Self {
            board: Board::new(),
            turn: Color::White,
            castling: "KQkq".to_string(),
            en_passant: "-".to_string(),
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn turn(&self) -> Color {
        self.turn
    }

    pub fn piece_at(&self, sq: Square) -> Option<Piece> {
        self.board.piece_at(sq)
    }

    /// Just the placement field, e.g. `rnbqkbnr/pppppppp/8/...`.
    pub fn board_notation(&self) -> String {
        encode_board(&self.board)
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            encode_board(&self.board),
            self.turn.char(),
            self.castling,
            self.en_passant,
            self.halfmove_clock,
            self.fullmove_number
        )
    }
}

impl FromStr for Position {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split_whitespace();
        let board = decode_board(fields.next().unwrap_or(""))?;

        let turn = match fields.next() {
            None => Color::White,
            Some(t) => t
                .chars()
                .next()
                .filter(|_| t.len() == 1)
                .and_then(Color::from_char)
                .ok_or_else(|| CoreError::InvalidNotation(format!("bad side to move '{t}'")))?,
        };
        let castling = fields.next().unwrap_or("KQkq").to_string();
        let en_passant = fields.next().unwrap_or("-").to_string();
        let halfmove_clock = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        let fullmove_number = fields.next().and_then(|v| v.parse().ok()).unwrap_or(1);

        Ok(Self {
            board,
            turn,
            castling,
            en_passant,
            halfmove_clock,
            fullmove_number,
        })
    }
}

/// Apply a single move to a position.
///
/// A pawn with a promotion letter becomes the promoted piece, cased for the
/// side to move (not for the pawn's own colour). Fails without touching the
/// input when the origin square is empty.
pub fn apply(position: &Position, mv: &Move) -> Result<Position, CoreError> {
    let mut board = position.board.clone();
    let piece = board
        .remove_piece_at(mv.from)
        .ok_or_else(|| CoreError::IllegalMoveApplication(mv.from.to_string()))?;

    let placed = match mv.promotion {
        Some(letter) if piece.role == Role::Pawn => {
            let role = Role::from_char(letter.to_ascii_lowercase())
                .ok_or_else(|| CoreError::InvalidPromotion(letter.to_string()))?;
            Piece {
                color: position.turn,
                role,
            }
        }
        _ => piece,
    };
    board.set_piece_at(mv.to, placed);

    Ok(Position {
        board,
        turn: position.turn.other(),
        castling: position.castling.clone(),
        en_passant: position.en_passant.clone(),
        halfmove_clock: 0,
        fullmove_number: 1,
    })
}

/// Position after the first `upto` moves of `moves` (clamped to the log length).
pub fn build(moves: &[Move], upto: usize) -> Result<Position, CoreError> {
    let upto = upto.min(moves.len());
    moves[..upto]
        .iter()
        .try_fold(Position::initial(), |pos, mv| apply(&pos, mv))
}

fn encode_board(board: &Board) -> String {
    let mut out = String::with_capacity(72);
    for rank in (0..8u32).rev() {
        let mut empty = 0;
        for file in 0..8u32 {
            let sq = Square::from_coords(File::new(file), Rank::new(rank));
            match board.piece_at(sq) {
                Some(piece) => {
                    if empty > 0 {
                        out.push_str(&empty.to_string());
                        empty = 0;
                    }
                    out.push(piece.char());
                }
                None => empty += 1,
            }
        }
        if empty > 0 {
            out.push_str(&empty.to_string());
        }
        if rank > 0 {
            out.push('/');
        }
    }
    out
}

fn decode_board(placement: &str) -> Result<Board, CoreError> {
    let ranks: Vec<&str> = placement.split('/').collect();
    if ranks.len() != 8 {
        return Err(CoreError::InvalidNotation(format!(
            "expected 8 ranks, found {}",
            ranks.len()
        )));
    }

    let mut board = Board::empty();
    for (i, row) in ranks.iter().enumerate() {
        let rank = 7 - i as u32;
        let mut file = 0u32;
        for c in row.chars() {
            if let Some(n) = c.to_digit(10) {
                file += n;
            } else {
                let piece = Piece::from_char(c)
                    .ok_or_else(|| CoreError::InvalidNotation(format!("unknown piece '{c}'")))?;
                if file >= 8 {
                    return Err(CoreError::InvalidNotation(format!(
                        "rank {} is too long",
                        rank + 1
                    )));
                }
                board.set_piece_at(Square::from_coords(File::new(file), Rank::new(rank)), piece);
                file += 1;
            }
        }
        if file != 8 {
            return Err(CoreError::InvalidNotation(format!(
                "rank {} does not describe 8 squares",
                rank + 1
            )));
        }
    }
    Ok(board)
}
