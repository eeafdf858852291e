//! Atomic, retention-bounded storage for resume logs.
//!
//! Layout: `{dir}/YYYY-MM-DDTHH-MM-SSZ_{session8}.md` plus a sibling
//! `.meta.json` with the header fields and checksum. Writes go to a
//! `.md.tmp` draft first; the rename to the final name is the commit point.
//! Crash leftovers (`.tmp` drafts, meta files without their `.md`) are
//! swept by `enforce_retention`.

use crate::log::ResumeLog;
use chrono::{DateTime, NaiveDateTime, Utc};
use mpm_core::{short_session_id, EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const MD_EXT: &str = "md";
const TMP_SUFFIX: &str = ".tmp";
const META_SUFFIX: &str = ".meta.json";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";
const TIMESTAMP_LEN: usize = 20;

/// Reference to a committed log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRef {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// What a retention pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub orphans_removed: usize,
    pub logs_removed: usize,
}

/// Sidecar header mirror, informative but not required for load.
#[derive(Debug, Serialize, Deserialize)]
struct MetaSidecar {
    schema_version: u16,
    session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_session_id: Option<String>,
    created_at: DateTime<Utc>,
    project_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    git_branch: Option<String>,
    token_budget_total: u32,
    tokens_at_generation: u32,
    trigger: String,
    checksum: String,
}

#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File stem for a log: timestamp + short session id.
    fn stem_for(log: &ResumeLog) -> String {
        format!(
            "{}_{}",
            log.created_at.format(TIMESTAMP_FORMAT),
            short_session_id(&log.session_id)
        )
    }

    /// Atomically persist a log: tmp write, fsync, meta sidecar, rename.
    pub fn persist(&self, log: &ResumeLog) -> Result<LogRef> {
        self.persist_cancellable(log, || false)
    }

    /// Like [`persist`](Self::persist), but checks `is_cancelled`
    /// immediately before the commit rename; a cancellation observed there
    /// leaves no artifact behind.
    pub fn persist_cancellable(
        &self,
        log: &ResumeLog,
        is_cancelled: impl Fn() -> bool,
    ) -> Result<LogRef> {
        fs::create_dir_all(&self.dir)?;

        let stem = Self::stem_for(log);
        let final_path = self.dir.join(format!("{stem}.{MD_EXT}"));
        let tmp_path = self.dir.join(format!("{stem}.{MD_EXT}{TMP_SUFFIX}"));
        let meta_path = self.dir.join(format!("{stem}{META_SUFFIX}"));

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(log.render().as_bytes())?;
        file.sync_all()?;
        drop(file);

        let sidecar = MetaSidecar {
            schema_version: log.schema_version,
            session_id: log.session_id.clone(),
            parent_session_id: log.parent_session_id.clone(),
            created_at: log.created_at,
            project_path: log.project_path.clone(),
            git_branch: log.git_branch.clone(),
            token_budget_total: log.token_budget_total,
            tokens_at_generation: log.tokens_at_generation,
            trigger: log.trigger.clone(),
            checksum: log.checksum(),
        };
        let meta_json = serde_json::to_string_pretty(&sidecar)
            .map_err(|e| EngineError::InvalidInput(format!("meta sidecar: {e}")))?;

        if is_cancelled() {
            let _ = fs::remove_file(&tmp_path);
            return Err(EngineError::Cancelled);
        }

        let mut meta_file = fs::File::create(&meta_path)?;
        meta_file.write_all(meta_json.as_bytes())?;
        meta_file.sync_all()?;
        drop(meta_file);

        // Commit point. Everything before this is invisible to list_latest.
        fs::rename(&tmp_path, &final_path)?;

        tracing::info!(path = %final_path.display(), trigger = %log.trigger, "resume log persisted");

        Ok(LogRef {
            path: final_path,
            created_at: log.created_at,
        })
    }

    /// Committed logs, newest first, capped at `n`.
    pub fn list_latest(&self, n: usize) -> Result<Vec<LogRef>> {
        let mut refs = self.list_all()?;
        refs.truncate(n);
        Ok(refs)
    }

    /// All committed logs, newest first.
    fn list_all(&self) -> Result<Vec<LogRef>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut refs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(&format!(".{MD_EXT}")) {
                continue;
            }
            match parse_file_timestamp(name) {
                Some(created_at) => refs.push(LogRef { path, created_at }),
                None => {
                    tracing::warn!(file = name, "skipping log with unparsable name");
                }
            }
        }

        // Newest first; file name disambiguates equal timestamps
        refs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(refs)
    }

    /// Load a log, recomputing and verifying its checksum.
    pub fn load(&self, log_ref: &LogRef) -> Result<ResumeLog> {
        let text = fs::read_to_string(&log_ref.path)?;
        ResumeLog::parse(&text, &log_ref.path)
    }

    /// Remove crash leftovers and, when `keep > 0`, the oldest logs beyond
    /// `keep`. `keep == 0` disables retention entirely. Idempotent.
    pub fn enforce_retention(&self, keep: u16) -> Result<RetentionReport> {
        let mut report = RetentionReport::default();
        if !self.dir.exists() {
            return Ok(report);
        }

        // Orphaned drafts are removed unconditionally.
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(TMP_SUFFIX) {
                fs::remove_file(&path)?;
                report.orphans_removed += 1;
                tracing::warn!(file = name, "removed orphaned draft");
            } else if let Some(stem) = name.strip_suffix(META_SUFFIX) {
                if !self.dir.join(format!("{stem}.{MD_EXT}")).exists() {
                    fs::remove_file(&path)?;
                    report.orphans_removed += 1;
                    tracing::warn!(file = name, "removed meta sidecar without log");
                }
            }
        }

        if keep == 0 {
            return Ok(report);
        }

        let refs = self.list_all()?;
        for stale in refs.iter().skip(keep as usize) {
            fs::remove_file(&stale.path)?;
            if let Some(meta) = meta_path_for(&stale.path) {
                let _ = fs::remove_file(meta);
            }
            report.logs_removed += 1;
            tracing::info!(path = %stale.path.display(), "retention removed log");
        }

        Ok(report)
    }
}

fn meta_path_for(md_path: &Path) -> Option<PathBuf> {
    let name = md_path.file_name()?.to_str()?;
    let stem = name.strip_suffix(&format!(".{MD_EXT}"))?;
    Some(md_path.with_file_name(format!("{stem}{META_SUFFIX}")))
}

/// Parse the leading `YYYY-MM-DDTHH-MM-SSZ` timestamp of a log file name.
fn parse_file_timestamp(file_name: &str) -> Option<DateTime<Utc>> {
    let stamp = file_name.get(..TIMESTAMP_LEN)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{Section, SCHEMA_VERSION};
    use chrono::TimeZone;
    use mpm_core::SectionName;
    use tempfile::tempdir;

    fn make_log(session_id: &str, minute: u32) -> ResumeLog {
        ResumeLog {
            schema_version: SCHEMA_VERSION,
            session_id: session_id.to_string(),
            parent_session_id: None,
            created_at: Utc.with_ymd_and_hms(2026, 8, 1, 10, minute, 0).unwrap(),
            project_path: PathBuf::from("/work/proj"),
            git_branch: Some("main".to_string()),
            token_budget_total: 200_000,
            tokens_at_generation: 1_000 + minute,
            trigger: "manual_pause".to_string(),
            sections: vec![
                Section::new(SectionName::ContextMetrics, format!("minute: {minute}")),
                Section::new(SectionName::MissionSummary, "Keep the tests green.".to_string()),
            ],
        }
    }

    #[test]
    fn test_persist_then_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        let log = make_log("01ARZ3NDEKTSV4RRFFQ69G5FAV", 0);

        let log_ref = store.persist(&log).unwrap();
        assert!(log_ref.path.exists());

        let loaded = store.load(&log_ref).unwrap();
        assert_eq!(loaded, log);
    }

    #[test]
    fn test_persist_file_name_shape() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        let log = make_log("01ARZ3NDEKTSV4RRFFQ69G5FAV", 5);

        let log_ref = store.persist(&log).unwrap();
        let name = log_ref.path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "2026-08-01T10-05-00Z_01ARZ3ND.md");
    }

    #[test]
    fn test_persist_writes_meta_sidecar() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        let log = make_log("01ARZ3NDEKTSV4RRFFQ69G5FAV", 5);

        store.persist(&log).unwrap();
        let meta_path = dir.path().join("2026-08-01T10-05-00Z_01ARZ3ND.meta.json");
        assert!(meta_path.exists());

        let sidecar: MetaSidecar =
            serde_json::from_str(&fs::read_to_string(meta_path).unwrap()).unwrap();
        assert_eq!(sidecar.session_id, log.session_id);
        assert_eq!(sidecar.checksum, log.checksum());
        assert_eq!(sidecar.trigger, "manual_pause");
    }

    #[test]
    fn test_list_latest_sorted_descending() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        for minute in [3, 1, 2] {
            store
                .persist(&make_log("01ARZ3NDEKTSV4RRFFQ69G5FAV", minute))
                .unwrap();
        }

        let refs = store.list_latest(10).unwrap();
        assert_eq!(refs.len(), 3);
        assert!(refs[0].created_at > refs[1].created_at);
        assert!(refs[1].created_at > refs[2].created_at);
    }

    #[test]
    fn test_list_latest_caps_count() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        for minute in 0..5 {
            store
                .persist(&make_log("01ARZ3NDEKTSV4RRFFQ69G5FAV", minute))
                .unwrap();
        }
        assert_eq!(store.list_latest(2).unwrap().len(), 2);
    }

    #[test]
    fn test_list_latest_excludes_tmp_drafts() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        store
            .persist(&make_log("01ARZ3NDEKTSV4RRFFQ69G5FAV", 1))
            .unwrap();
        fs::write(
            dir.path().join("2026-08-01T10-09-00Z_01ARZ3ND.md.tmp"),
            "half-written",
        )
        .unwrap();

        let refs = store.list_latest(10).unwrap();
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn test_list_latest_empty_dir() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().join("never-created"));
        assert!(store.list_latest(10).unwrap().is_empty());
    }

    #[test]
    fn test_load_detects_corruption() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        let log_ref = store
            .persist(&make_log("01ARZ3NDEKTSV4RRFFQ69G5FAV", 1))
            .unwrap();

        let mut text = fs::read_to_string(&log_ref.path).unwrap();
        text = text.replace("Keep the tests green.", "Keep the tests red.");
        fs::write(&log_ref.path, text).unwrap();

        let err = store.load(&log_ref).unwrap_err();
        assert!(matches!(err, EngineError::CorruptLog { .. }));
    }

    #[test]
    fn test_cancel_before_rename_leaves_no_artifact() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        let log = make_log("01ARZ3NDEKTSV4RRFFQ69G5FAV", 1);

        let err = store.persist_cancellable(&log, || true).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(store.list_latest(10).unwrap().is_empty());
        // No draft left behind either
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_retention_removes_tmp_orphans() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        store
            .persist(&make_log("01ARZ3NDEKTSV4RRFFQ69G5FAV", 1))
            .unwrap();
        fs::write(dir.path().join("2026-08-01T10-09-00Z_01ARZ3ND.md.tmp"), "x").unwrap();

        let report = store.enforce_retention(10).unwrap();
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(report.logs_removed, 0);
        assert_eq!(store.list_latest(10).unwrap().len(), 1);
    }

    #[test]
    fn test_retention_removes_meta_without_log() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join("2026-08-01T10-09-00Z_01ARZ3ND.meta.json"), "{}").unwrap();

        let report = store.enforce_retention(10).unwrap();
        assert_eq!(report.orphans_removed, 1);
    }

    #[test]
    fn test_retention_keeps_n_most_recent() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        for minute in 0..5 {
            store
                .persist(&make_log("01ARZ3NDEKTSV4RRFFQ69G5FAV", minute))
                .unwrap();
        }

        let report = store.enforce_retention(2).unwrap();
        assert_eq!(report.logs_removed, 3);

        let refs = store.list_latest(10).unwrap();
        assert_eq!(refs.len(), 2);
        // The two newest survive
        assert!(refs[0]
            .path
            .to_string_lossy()
            .contains("2026-08-01T10-04-00Z"));
        assert!(refs[1]
            .path
            .to_string_lossy()
            .contains("2026-08-01T10-03-00Z"));
        // Their meta sidecars survive; the removed ones are gone
        assert!(dir.path().join("2026-08-01T10-04-00Z_01ARZ3ND.meta.json").exists());
        assert!(!dir.path().join("2026-08-01T10-00-00Z_01ARZ3ND.meta.json").exists());
    }

    #[test]
    fn test_retention_zero_disables() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        for minute in 0..4 {
            store
                .persist(&make_log("01ARZ3NDEKTSV4RRFFQ69G5FAV", minute))
                .unwrap();
        }

        let report = store.enforce_retention(0).unwrap();
        assert_eq!(report.logs_removed, 0);
        assert_eq!(store.list_latest(10).unwrap().len(), 4);
    }

    #[test]
    fn test_retention_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path());
        for minute in 0..5 {
            store
                .persist(&make_log("01ARZ3NDEKTSV4RRFFQ69G5FAV", minute))
                .unwrap();
        }

        let first = store.enforce_retention(2).unwrap();
        assert_eq!(first.logs_removed, 3);
        let second = store.enforce_retention(2).unwrap();
        assert_eq!(second, RetentionReport::default());
        assert_eq!(store.list_latest(10).unwrap().len(), 2);
    }

    #[test]
    fn test_retention_on_missing_dir() {
        let dir = tempdir().unwrap();
        let store = LogStore::new(dir.path().join("absent"));
        let report = store.enforce_retention(5).unwrap();
        assert_eq!(report, RetentionReport::default());
    }

    #[test]
    fn test_parse_file_timestamp() {
        let ts = parse_file_timestamp("2026-08-01T10-05-00Z_01ARZ3ND.md").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 8, 1, 10, 5, 0).unwrap());
        assert!(parse_file_timestamp("short").is_none());
        assert!(parse_file_timestamp("not-a-timestamp-here_x.md").is_none());
    }
}
