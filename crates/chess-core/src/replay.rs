//! Replay cursor over a move log.
//!
//! The cursor counts applied moves: `0` is the initial position and
//! `log_len` is the live position. Anything in between is history and is
//! read-only for the caller.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayNavigator {
    index: usize,
}

impl ReplayNavigator {
    /// A cursor sitting on the live position of a log of `log_len` moves.
    pub fn live(log_len: usize) -> Self {
        Self { index: log_len }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_live(&self, log_len: usize) -> bool {
        self.index == log_len
    }

    /// Move to `index`, clamped to `[0, log_len]`.
    pub fn set(&mut self, index: i64, log_len: usize) -> usize {
        self.index = index.clamp(0, log_len as i64) as usize;
        self.index
    }

    /// Move by `delta`, clamped the same way as `set`.
    pub fn step(&mut self, delta: i64, log_len: usize) -> usize {
        self.set(self.index as i64 + delta, log_len)
    }

    pub fn to_start(&mut self) {
        self.index = 0;
    }

    pub fn to_live(&mut self, log_len: usize) {
        self.index = log_len;
    }

    /// Re-anchor after the log changed length. A cursor that was live stays
    /// live; a historical cursor keeps its index unless the log shrank below it.
    pub fn follow(&mut self, was_live: bool, log_len: usize) {
        if was_live {
            self.index = log_len;
        } else {
            self.index = self.index.min(log_len);
        }
    }
}
