//! Connection generation token.
//!
//! Every (re)connect attempt bumps the generation; every spawned listener
//! and in-flight transport call captures the value it was issued under.
//! An event whose captured generation no longer matches the current one is
//! void: it must not mutate shared state, and anything it holds is released
//! by dropping it.

use std::fmt;

/// Monotonically increasing connection counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u32);

impl Generation {
    pub const fn initial() -> Self {
        Generation(0)
    }

    /// Advance to the next generation and return it.
    pub fn bump(&mut self) -> Generation {
        self.0 = self.0.wrapping_add(1);
        *self
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
