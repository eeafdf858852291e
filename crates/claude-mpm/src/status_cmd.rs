//! `mpm status`: occupancy, threshold level and stored logs.
//!
//! Read-only by design: the storage directory is never locked or mutated,
//! so status works while another session holds the writer lock. Occupancy
//! is the rehydrated cost a fresh session would start with.

use anyhow::Result;
use mpm_config::ContextConfig;
use mpm_ledger::Budget;
use mpm_lock::probe_writer_lock;
use mpm_resume::{LogStore, ResumeLog};
use serde_json::json;
use std::path::Path;

pub fn handle_status(project_root: &Path, json_output: bool) -> Result<i32> {
    let config = ContextConfig::resolve(project_root)?;

    if !config.enabled {
        if json_output {
            println!("{}", json!({ "enabled": false }));
        } else {
            println!("context engine disabled");
        }
        return Ok(0);
    }

    let budget = Budget::new(
        config.budget_total,
        config.thresholds.caution,
        config.thresholds.warning,
        config.thresholds.critical,
    )?;

    let storage_dir = config.storage_dir(project_root);
    let active_session = probe_writer_lock(&storage_dir, "").unwrap_or(None);

    let store = LogStore::new(&storage_dir);
    let refs = store.list_latest(usize::MAX)?;
    let latest: Option<ResumeLog> = refs.first().and_then(|r| store.load(r).ok());

    let preload_tokens = latest
        .as_ref()
        .map(|log| u64::from(log.total_section_tokens()))
        .unwrap_or(0);
    let occupancy = budget.occupancy_of(preload_tokens);
    let level = budget.level_for(occupancy);
    let last_log = refs.first().map(|r| r.path.clone());

    if json_output {
        println!(
            "{}",
            json!({
                "enabled": true,
                "budget_total": budget.total_tokens,
                "preload_tokens": preload_tokens,
                "occupancy": (occupancy * 10_000.0).round() / 10_000.0,
                "level": level.as_str(),
                "last_log": last_log.as_ref().map(|p| p.display().to_string()),
                "log_count": refs.len(),
                "active_session": active_session,
            })
        );
    } else {
        println!(
            "occupancy: {:.1}% of {} tokens",
            occupancy * 100.0,
            budget.total_tokens
        );
        println!("level: {level}");
        match &last_log {
            Some(path) => println!("last log: {}", path.display()),
            None => println!("last log: none"),
        }
        println!("log count: {}", refs.len());
        if let Some(session) = &active_session {
            println!("active session: {session}");
        }
    }

    Ok(0)
}
