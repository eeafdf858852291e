//! `mpm resume`: print the log a new session would load. Read-only; the
//! actual rehydration (with cleanup and preload) happens at engine
//! bootstrap.

use anyhow::Result;
use mpm_config::ContextConfig;
use mpm_resume::LogStore;
use std::path::Path;

pub const EXIT_FOUND: i32 = 0;
pub const EXIT_NONE: i32 = 1;

/// Candidates checked newest-first, matching the rehydrator's policy.
const MAX_CANDIDATES: usize = 3;

pub fn handle_resume(project_root: &Path) -> Result<i32> {
    let config = ContextConfig::resolve(project_root)?;

    if !config.enabled || !config.resume_logs.enabled || !config.resume_logs.auto_load {
        return Ok(EXIT_NONE);
    }

    let store = LogStore::new(config.storage_dir(project_root));
    for candidate in store.list_latest(MAX_CANDIDATES)? {
        match store.load(&candidate) {
            Ok(_) => {
                println!("{}", candidate.path.display());
                return Ok(EXIT_FOUND);
            }
            Err(error) => {
                tracing::warn!(path = %candidate.path.display(), %error, "skipping corrupt log");
            }
        }
    }

    Ok(EXIT_NONE)
}
