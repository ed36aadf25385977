//! Client-side game-state reconciliation engine.
//!
//! [`sync::SyncCoordinator`] merges optimistic local moves, push-delivered
//! moves and polled server state into a single move log per game view.
//! [`channel::ConnectionManager`] owns the push-channel lifecycle and
//! [`runtime::Runtime`] drives both on a single-threaded tokio runtime.

pub mod channel;
pub mod clients;
pub mod config;
pub mod error;
pub mod lobby;
pub mod observers;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod sync;

pub use channel::{ConnectionManager, ConnectionState, SharedConnection};
pub use clients::ApiClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use lobby::{LobbyCoordinator, LobbyView};
pub use session::{Session, SharedSession};
pub use sync::{GameView, SyncCoordinator};
