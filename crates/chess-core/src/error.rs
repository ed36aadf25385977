//! Core error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid board notation: {0}")]
    InvalidNotation(String),

    #[error("Invalid square: {0}")]
    InvalidSquare(String),

    /// The origin square of a move holds no piece.
    #[error("Illegal move application: no piece on {0}")]
    IllegalMoveApplication(String),

    #[error("Invalid promotion piece: {0}")]
    InvalidPromotion(String),
}
