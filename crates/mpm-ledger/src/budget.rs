use mpm_core::{EngineError, Result, ThresholdLevel};
use serde::{Deserialize, Serialize};

/// Smallest window the engine will account against.
const MIN_TOTAL_TOKENS: u32 = 1_000;

/// Occupancy values above the window are clamped one reporting step past
/// full so overruns stay visible at 4-decimal precision.
pub(crate) const OCCUPANCY_CEILING: f64 = 1.0001;

/// Token window and its graduated occupancy thresholds.
///
/// Invariants: `0 < caution < warning < critical < 1.0` and
/// `total_tokens >= 1000`, checked at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub total_tokens: u32,
    pub caution: f32,
    pub warning: f32,
    pub critical: f32,
}

impl Budget {
    pub fn new(total_tokens: u32, caution: f32, warning: f32, critical: f32) -> Result<Self> {
        if total_tokens < MIN_TOTAL_TOKENS {
            return Err(EngineError::InvalidInput(format!(
                "budget total_tokens must be >= {MIN_TOTAL_TOKENS} (got {total_tokens})"
            )));
        }
        if !(caution > 0.0 && caution < warning && warning < critical && critical < 1.0) {
            return Err(EngineError::InvalidInput(format!(
                "thresholds must satisfy 0 < caution < warning < critical < 1.0 \
                 (got {caution} / {warning} / {critical})"
            )));
        }
        Ok(Self {
            total_tokens,
            caution,
            warning,
            critical,
        })
    }

    /// Raw occupancy for a consumed token count, clamped to
    /// `[0, OCCUPANCY_CEILING]`.
    pub fn occupancy_of(&self, consumed: u64) -> f64 {
        let raw = consumed as f64 / f64::from(self.total_tokens);
        raw.clamp(0.0, OCCUPANCY_CEILING)
    }

    /// The band a raw occupancy value falls into. Boundaries are inclusive:
    /// occupancy equal to a threshold is inside the higher band. Configured
    /// fractions are compared at their own (f32) precision so that equality
    /// holds regardless of how the fraction rounds; exhaustion compares the
    /// exact ratio.
    pub fn level_for(&self, occupancy: f64) -> ThresholdLevel {
        let quantized = occupancy as f32;
        if occupancy >= 1.0 {
            ThresholdLevel::Exhausted
        } else if quantized >= self.critical {
            ThresholdLevel::Critical
        } else if quantized >= self.warning {
            ThresholdLevel::Warning
        } else if quantized >= self.caution {
            ThresholdLevel::Caution
        } else {
            ThresholdLevel::Nominal
        }
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            total_tokens: 200_000,
            caution: 0.70,
            warning: 0.85,
            critical: 0.95,
        }
    }
}
