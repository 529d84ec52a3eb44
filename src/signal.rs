use std::fmt;

use serde::{Deserialize, Serialize};

/// Level of a single bus line.
///
/// `Assert` is the active level of the line: an interrupt request is pending,
/// a clock is high, or a device is ready (for READY).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineState {
    #[default]
    Clear,
    Assert,
}

impl LineState {
    pub fn is_asserted(self) -> bool {
        self == LineState::Assert
    }

    pub fn is_clear(self) -> bool {
        self == LineState::Clear
    }
}

impl From<bool> for LineState {
    fn from(asserted: bool) -> Self {
        if asserted {
            LineState::Assert
        } else {
            LineState::Clear
        }
    }
}

impl From<LineState> for bool {
    fn from(state: LineState) -> Self {
        state.is_asserted()
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineState::Clear => write!(f, "CLEAR"),
            LineState::Assert => write!(f, "ASSERT"),
        }
    }
}

/// Upward line callback (towards the console or the next bus level).
pub type LineCallback = Box<dyn FnMut(LineState)>;

/// Open-collector line shared by several contributors.
///
/// Each contributor owns one bit. A set bit means the contributor is pulling
/// the line down; the line is pulled as long as any bit is set. Updates are
/// incremental, so setting an already set bit or clearing a bit that was
/// never set leaves the combined level alone.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WiredAnd {
    pulled: u16,
}

impl WiredAnd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets or clears the contributor's bit and returns whether the line is
    /// pulled afterwards.
    pub fn join(&mut self, contributor: usize, pulling: bool) -> bool {
        debug_assert!(contributor < 16);
        let bit = 1u16 << contributor;
        if pulling {
            self.pulled |= bit;
        } else {
            self.pulled &= !bit;
        }
        self.is_pulled()
    }

    pub fn is_pulled(&self) -> bool {
        self.pulled != 0
    }

    pub fn is_pulled_by(&self, contributor: usize) -> bool {
        self.pulled & (1 << contributor) != 0
    }

    pub fn mask(&self) -> u16 {
        self.pulled
    }

    pub fn clear(&mut self) {
        self.pulled = 0;
    }

    /// Joins an active-high line (INTA, INTB, LCP): the bit is set while the
    /// contributor asserts.
    pub fn join_asserted(&mut self, contributor: usize, state: LineState) -> LineState {
        self.join(contributor, state.is_asserted()).into()
    }

    /// Joins READY: the stored bit is the inverse of the contributor's level,
    /// so the combined READY is asserted only while nobody is holding it low.
    pub fn join_ready(&mut self, contributor: usize, state: LineState) -> LineState {
        (!self.join(contributor, state.is_clear())).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_asserted() {
        let mut line = WiredAnd::new();
        assert_eq!(line.join_asserted(3, LineState::Assert), LineState::Assert);
        assert_eq!(line.join_asserted(5, LineState::Assert), LineState::Assert);
        assert_eq!(line.join_asserted(3, LineState::Clear), LineState::Assert);
        assert_eq!(line.join_asserted(5, LineState::Clear), LineState::Clear);
        assert_eq!(line.mask(), 0);
    }

    #[test]
    fn test_join_ready_is_inverted() {
        let mut ready = WiredAnd::new();
        assert_eq!(ready.join_ready(2, LineState::Clear), LineState::Clear);
        assert!(ready.is_pulled_by(2));
        assert_eq!(ready.join_ready(2, LineState::Assert), LineState::Assert);
        assert!(!ready.is_pulled());
    }

    #[test]
    fn test_line_state_conversions() {
        assert_eq!(LineState::from(true), LineState::Assert);
        assert!(!bool::from(LineState::Clear));
        assert_eq!(LineState::default(), LineState::Clear);
        assert_eq!(LineState::Assert.to_string(), "ASSERT");
    }
}
