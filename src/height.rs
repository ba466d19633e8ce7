//! Monotonic chain-height tracking.
//!
//! Push messages, block events, periodic pulls and the demo generator all report
//! heights. They land in one [`ObservedHeight`] which only ever moves forward, so the
//! displayed height is non-decreasing for the lifetime of a session regardless of how
//! the sources interleave.

/// Highest chain height seen so far in this session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservedHeight {
    current: Option<u64>,
}

impl ObservedHeight {
    /// Create an empty tracker (nothing observed yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Current height, if any source has reported one.
    #[must_use]
    pub fn get(&self) -> Option<u64> {
        self.current
    }

    /// Record a reported height.
    ///
    /// Stores `max(current, reported)` and returns `Some(height)` only when the stored
    /// value actually increased.
    pub fn observe(&mut self, reported: u64) -> Option<u64> {
        match self.current {
            Some(current) if reported <= current => None,
            _ => {
                self.current = Some(reported);
                Some(reported)
            }
        }
    }
}
