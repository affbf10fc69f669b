//! Scheduled demand shocks that uniformly deflate welfare parameters.

use crate::config::RecessionShock;

/// A validated, start-ordered shock schedule. Shocks are half-open periods
/// `[start, end)`; outside any shock the magnitude is zero.
#[derive(Debug, Clone, Default)]
pub struct RecessionSchedule {
    shocks: Vec<RecessionShock>,
}

impl RecessionSchedule {
    pub fn new(mut shocks: Vec<RecessionShock>) -> Self {
        shocks.sort_by_key(|s| s.start);
        Self { shocks }
    }

    /// Active shock magnitude in `period`, or zero.
    pub fn magnitude_at(&self, period: u64) -> f64 {
        self.shocks
            .iter()
            .find(|s| s.start <= period && period < s.end)
            .map_or(0.0, |s| s.magnitude)
    }
}
