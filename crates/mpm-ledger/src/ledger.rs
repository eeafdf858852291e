//! Monotonic token ledger.

use crate::budget::Budget;
use mpm_core::{EngineError, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Consistent read of the ledger counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    pub used: u64,
    pub rehydrated: u64,
    pub total: u32,
    /// Occupancy rounded half-to-even to 4 decimal places. Threshold
    /// comparisons never use this; they use the raw ratio.
    pub occupancy: f64,
}

/// Running account of tokens consumed this session.
///
/// Safe for one concurrent writer and any number of readers: counters are
/// plain atomics with acquire/release ordering, and `rehydrated` is frozen
/// before the first `record_usage`.
#[derive(Debug)]
pub struct TokenLedger {
    budget: Budget,
    used: AtomicU64,
    rehydrated: AtomicU64,
    used_any: AtomicBool,
    preloaded: AtomicBool,
}

impl TokenLedger {
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            used: AtomicU64::new(0),
            rehydrated: AtomicU64::new(0),
            used_any: AtomicBool::new(false),
            preloaded: AtomicBool::new(false),
        }
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Record one turn's token usage. Returns the new raw occupancy.
    pub fn record_usage(&self, input_tokens: i64, output_tokens: i64) -> Result<f64> {
        if input_tokens < 0 || output_tokens < 0 {
            return Err(EngineError::InvalidInput(format!(
                "token counts must be non-negative (got input={input_tokens}, output={output_tokens})"
            )));
        }

        let delta = input_tokens as u64 + output_tokens as u64;
        self.used_any.store(true, Ordering::Release);
        let prior = self.used.fetch_add(delta, Ordering::AcqRel);

        Ok(self.occupancy_for_used(prior + delta))
    }

    /// One-shot preload of the token cost carried by a loaded resume log.
    /// Must happen before any usage is recorded.
    pub fn preload(&self, rehydrated_tokens: u64) -> Result<()> {
        if self.used_any.load(Ordering::Acquire) || self.preloaded.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyInitialized);
        }
        self.rehydrated.store(rehydrated_tokens, Ordering::Release);
        Ok(())
    }

    /// Current raw occupancy (used for threshold comparisons).
    pub fn occupancy(&self) -> f64 {
        self.occupancy_for_used(self.used.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let used = self.used.load(Ordering::Acquire);
        let rehydrated = self.rehydrated.load(Ordering::Acquire);
        let raw = self.budget.occupancy_of(used + rehydrated);
        LedgerSnapshot {
            used,
            rehydrated,
            total: self.budget.total_tokens,
            occupancy: round_occupancy(raw),
        }
    }

    fn occupancy_for_used(&self, used: u64) -> f64 {
        let rehydrated = self.rehydrated.load(Ordering::Acquire);
        self.budget.occupancy_of(used + rehydrated)
    }
}

/// Round half-to-even to 4 decimal places, for reporting only.
fn round_occupancy(raw: f64) -> f64 {
    (raw * 10_000.0).round_ties_even() / 10_000.0
}
