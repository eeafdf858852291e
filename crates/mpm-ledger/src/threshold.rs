//! Graduated threshold state machine.
//!
//! ```text
//!   Nominal   --occupancy >= caution--> Caution
//!   Caution   --occupancy >= warning--> Warning
//!   Warning   --occupancy >= critical--> Critical
//!   Critical  --occupancy >= 1.0    --> Exhausted
//! ```
//!
//! Transitions are one-way within a session and each level is emitted at
//! most once. Downward motion of occupancy never lowers the level, which is
//! what keeps oscillation around a boundary from re-firing triggers.

use crate::budget::Budget;
use mpm_core::ThresholdLevel;

#[derive(Debug)]
pub struct ThresholdEngine {
    budget: Budget,
    current: ThresholdLevel,
}

impl ThresholdEngine {
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            current: ThresholdLevel::Nominal,
        }
    }

    pub fn current_level(&self) -> ThresholdLevel {
        self.current
    }

    /// Whether a level has been reached at any point this session.
    pub fn reached(&self, level: ThresholdLevel) -> bool {
        level <= self.current
    }

    /// Observe a new raw occupancy. Returns the highest newly crossed level
    /// on its first upward crossing, `None` otherwise. When several
    /// thresholds cross at once the intermediate levels are recorded as
    /// reached but only the highest is emitted.
    pub fn observe(&mut self, occupancy: f64) -> Option<ThresholdLevel> {
        let observed = self.budget.level_for(occupancy);
        if observed > self.current {
            tracing::debug!(
                from = %self.current,
                to = %observed,
                occupancy,
                "threshold level crossed"
            );
            self.current = observed;
            Some(observed)
        } else {
            None
        }
    }
}
