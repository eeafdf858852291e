//! Startup rehydration: locate the latest valid log and surface its
//! preload cost.

use crate::log::ResumeLog;
use crate::store::{LogRef, LogStore};
use mpm_core::Result;

/// How many newest-first candidates to try before giving up.
const MAX_LOAD_ATTEMPTS: usize = 3;

/// Bootstrap context handed to the caller so the ledger can `preload`.
#[derive(Debug, Clone)]
pub struct BootstrapContext {
    pub log: ResumeLog,
    pub preload_tokens: u64,
    pub source: LogRef,
}

/// Locate, validate and expose the most recent resume log.
///
/// Orphan cleanup always runs; retention runs when `auto_cleanup` is set.
/// Corrupt candidates are skipped with a warning, up to three attempts.
pub fn bootstrap(
    store: &LogStore,
    auto_load: bool,
    auto_cleanup: bool,
    keep_count: u16,
) -> Result<Option<BootstrapContext>> {
    let keep = if auto_cleanup { keep_count } else { 0 };
    store.enforce_retention(keep)?;

    if !auto_load {
        return Ok(None);
    }

    let candidates = store.list_latest(MAX_LOAD_ATTEMPTS)?;
    if candidates.is_empty() {
        return Ok(None);
    }

    for candidate in &candidates {
        match store.load(candidate) {
            Ok(log) => {
                let preload_tokens = u64::from(log.total_section_tokens());
                tracing::info!(
                    path = %candidate.path.display(),
                    preload_tokens,
                    "rehydrated resume log"
                );
                return Ok(Some(BootstrapContext {
                    log,
                    preload_tokens,
                    source: candidate.clone(),
                }));
            }
            Err(error) => {
                tracing::warn!(
                    path = %candidate.path.display(),
                    %error,
                    "skipping unreadable resume log"
                );
            }
        }
    }

    tracing::warn!(
        attempts = candidates.len(),
        "no usable resume log found during rehydration"
    );
    Ok(None)
}
