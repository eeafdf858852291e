//! Token accounting against a fixed context window.
//!
//! The ledger is a monotonic counter pair safe for one writer and many
//! readers; the threshold engine is a one-way ratchet over occupancy.

pub mod budget;
pub mod ledger;
pub mod threshold;

pub use budget::Budget;
pub use ledger::{LedgerSnapshot, TokenLedger};
pub use threshold::ThresholdEngine;
