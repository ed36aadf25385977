//! Pure game model shared by the client engine: board notation, move log,
//! replay cursor and clock estimation. Nothing in here performs I/O.

pub mod clock;
pub mod error;
pub mod game_data;
pub mod moves;
pub mod position;
pub mod replay;

pub use shakmaty::{Color, Square};

pub use clock::{format_clock, ClockDisplay, ClockEstimator};
pub use error::CoreError;
pub use game_data::{GameDto, GameState, GameStatus, MoveDto};
pub use moves::{Move, MoveLog};
pub use position::{apply, build, Position, INITIAL_FEN};
pub use replay::ReplayNavigator;
