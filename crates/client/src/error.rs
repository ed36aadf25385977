//! Client error types

use chess_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Illegal move: {0}")]
    IllegalMove(#[from] CoreError),

    #[error("Game not loaded yet")]
    GameNotLoaded,

    #[error("Game is finished")]
    GameFinished,

    #[error("Replay is not at the live position")]
    NotLive,

    #[error("Not your turn")]
    NotYourTurn,
}

impl ClientError {
    /// Errors that the session collaborator must handle (credential cleared).
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ClientError::Unauthorized)
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
