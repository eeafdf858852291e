use mpm_core::{EngineError, SectionName, TriggerKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_DIR_NAME: &str = ".claude-mpm";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Resolved engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Master switch; when false all operations become no-ops.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Total token window for a session.
    #[serde(default = "default_budget_total")]
    pub budget_total: u32,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub resume_logs: ResumeLogsConfig,
}

/// Occupancy fractions for the graduated warning levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Thresholds {
    #[serde(default = "default_caution")]
    pub caution: f32,
    #[serde(default = "default_warning")]
    pub warning: f32,
    #[serde(default = "default_critical")]
    pub critical: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResumeLogsConfig {
    /// Enables synthesis and the log store.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// If false, only an explicit pause generates a log.
    #[serde(default = "default_true")]
    pub auto_generate: bool,

    /// If false, the rehydrator never loads a prior log.
    #[serde(default = "default_true")]
    pub auto_load: bool,

    /// Total per-log token cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Absolute or project-relative storage directory.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Enabled trigger names, drawn from the fixed trigger-kind set.
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,

    #[serde(default)]
    pub cleanup: CleanupConfig,

    #[serde(default)]
    pub token_allocation: TokenAllocation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupConfig {
    /// Number of most recent logs to keep; 0 disables retention.
    #[serde(default = "default_keep_count")]
    pub keep_count: u16,

    /// Run retention on session start.
    #[serde(default = "default_true")]
    pub auto_cleanup: bool,
}

/// Per-section token budgets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenAllocation {
    #[serde(default = "default_context_metrics")]
    pub context_metrics: u32,
    #[serde(default = "default_mission_summary")]
    pub mission_summary: u32,
    #[serde(default = "default_accomplishments")]
    pub accomplishments: u32,
    #[serde(default = "default_key_findings")]
    pub key_findings: u32,
    #[serde(default = "default_decisions")]
    pub decisions: u32,
    #[serde(default = "default_next_steps")]
    pub next_steps: u32,
    #[serde(default = "default_critical_context")]
    pub critical_context: u32,
}

fn default_true() -> bool {
    true
}

fn default_budget_total() -> u32 {
    200_000
}

fn default_caution() -> f32 {
    0.70
}

fn default_warning() -> f32 {
    0.85
}

fn default_critical() -> f32 {
    0.95
}

fn default_max_tokens() -> u32 {
    10_000
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR_NAME).join("resume-logs")
}

fn default_triggers() -> Vec<String> {
    TriggerKind::CONFIGURABLE
        .iter()
        .map(|kind| kind.as_str().to_string())
        .collect()
}

fn default_keep_count() -> u16 {
    10
}

fn default_context_metrics() -> u32 {
    SectionName::ContextMetrics.default_budget()
}

fn default_mission_summary() -> u32 {
    SectionName::MissionSummary.default_budget()
}

fn default_accomplishments() -> u32 {
    SectionName::Accomplishments.default_budget()
}

fn default_key_findings() -> u32 {
    SectionName::KeyFindings.default_budget()
}

fn default_decisions() -> u32 {
    SectionName::Decisions.default_budget()
}

fn default_next_steps() -> u32 {
    SectionName::NextSteps.default_budget()
}

fn default_critical_context() -> u32 {
    SectionName::CriticalContext.default_budget()
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            caution: default_caution(),
            warning: default_warning(),
            critical: default_critical(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            keep_count: default_keep_count(),
            auto_cleanup: true,
        }
    }
}

impl Default for TokenAllocation {
    fn default() -> Self {
        Self {
            context_metrics: default_context_metrics(),
            mission_summary: default_mission_summary(),
            accomplishments: default_accomplishments(),
            key_findings: default_key_findings(),
            decisions: default_decisions(),
            next_steps: default_next_steps(),
            critical_context: default_critical_context(),
        }
    }
}

impl Default for ResumeLogsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_generate: true,
            auto_load: true,
            max_tokens: default_max_tokens(),
            storage_dir: default_storage_dir(),
            triggers: default_triggers(),
            cleanup: CleanupConfig::default(),
            token_allocation: TokenAllocation::default(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            budget_total: default_budget_total(),
            thresholds: Thresholds::default(),
            resume_logs: ResumeLogsConfig::default(),
        }
    }
}

impl TokenAllocation {
    /// Allocations paired with their section, in persisted order.
    pub fn per_section(&self) -> [(SectionName, u32); 7] {
        [
            (SectionName::ContextMetrics, self.context_metrics),
            (SectionName::MissionSummary, self.mission_summary),
            (SectionName::Accomplishments, self.accomplishments),
            (SectionName::KeyFindings, self.key_findings),
            (SectionName::Decisions, self.decisions),
            (SectionName::NextSteps, self.next_steps),
            (SectionName::CriticalContext, self.critical_context),
        ]
    }

    pub fn total(&self) -> u32 {
        self.per_section().iter().map(|(_, budget)| budget).sum()
    }
}

impl ContextConfig {
    /// Resolve the configuration for a project: defaults, then the config
    /// file if present, then environment overrides, then validation.
    pub fn resolve(project_root: &Path) -> Result<Self, EngineError> {
        let mut config = Self::load_file(project_root)?.unwrap_or_default();

        let mut errors = crate::env::apply_env_overrides(&mut config);
        errors.extend(crate::validate::validate_config(&config));

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(EngineError::InvalidConfig(errors))
        }
    }

    /// Load `.claude-mpm/config.toml` relative to the project root.
    /// Returns None if the file does not exist.
    pub fn load_file(project_root: &Path) -> Result<Option<Self>, EngineError> {
        let config_path = Self::config_path(project_root);
        if !config_path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: ContextConfig = toml::from_str(&content).map_err(|e| {
            EngineError::InvalidConfig(vec![format!("{}: {e}", config_path.display())])
        })?;
        tracing::debug!(path = %config_path.display(), "loaded engine config");
        Ok(Some(config))
    }

    /// Save config to `.claude-mpm/config.toml`.
    pub fn save(&self, project_root: &Path) -> Result<(), EngineError> {
        let config_dir = project_root.join(CONFIG_DIR_NAME);
        std::fs::create_dir_all(&config_dir)?;
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::InvalidConfig(vec![format!("serialize: {e}")]))?;
        std::fs::write(config_dir.join(CONFIG_FILE_NAME), content)?;
        Ok(())
    }

    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)
    }

    /// Storage directory resolved against the project root.
    pub fn storage_dir(&self, project_root: &Path) -> PathBuf {
        if self.resume_logs.storage_dir.is_absolute() {
            self.resume_logs.storage_dir.clone()
        } else {
            project_root.join(&self.resume_logs.storage_dir)
        }
    }

    /// Parsed enabled trigger kinds. Unknown names were rejected at
    /// validation time, so this silently skips them.
    pub fn enabled_triggers(&self) -> Vec<TriggerKind> {
        self.resume_logs
            .triggers
            .iter()
            .filter_map(|name| TriggerKind::from_config_name(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_spec_table() {
        let config = ContextConfig::default();
        assert!(config.enabled);
        assert_eq!(config.budget_total, 200_000);
        assert_eq!(config.thresholds.caution, 0.70);
        assert_eq!(config.thresholds.warning, 0.85);
        assert_eq!(config.thresholds.critical, 0.95);
        assert!(config.resume_logs.enabled);
        assert!(config.resume_logs.auto_generate);
        assert!(config.resume_logs.auto_load);
        assert_eq!(config.resume_logs.max_tokens, 10_000);
        assert_eq!(
            config.resume_logs.storage_dir,
            PathBuf::from(".claude-mpm/resume-logs")
        );
        assert_eq!(config.resume_logs.triggers.len(), 5);
        assert_eq!(config.resume_logs.cleanup.keep_count, 10);
        assert!(config.resume_logs.cleanup.auto_cleanup);
        assert_eq!(config.resume_logs.token_allocation.total(), 10_000);
    }

    #[test]
    fn test_load_nonexistent_returns_none() {
        let dir = tempdir().unwrap();
        assert!(ContextConfig::load_file(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();

        let mut config = ContextConfig::default();
        config.budget_total = 150_000;
        config.resume_logs.cleanup.keep_count = 3;
        config.save(dir.path()).unwrap();

        let loaded = ContextConfig::load_file(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.budget_total, 150_000);
        assert_eq!(loaded.resume_logs.cleanup.keep_count, 3);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR_NAME);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join(CONFIG_FILE_NAME),
            "budget_total = 100000\nturbo_mode = true\n",
        )
        .unwrap();

        let err = ContextConfig::load_file(dir.path()).unwrap_err();
        assert!(err.to_string().contains("turbo_mode"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR_NAME);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join(CONFIG_FILE_NAME),
            "[resume_logs]\nmax_tokens = 12000\n",
        )
        .unwrap();

        let loaded = ContextConfig::load_file(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.resume_logs.max_tokens, 12_000);
        assert_eq!(loaded.budget_total, 200_000);
        assert_eq!(loaded.resume_logs.token_allocation.key_findings, 2_500);
    }

    #[test]
    fn test_storage_dir_resolution() {
        let config = ContextConfig::default();
        let resolved = config.storage_dir(Path::new("/work/proj"));
        assert_eq!(
            resolved,
            PathBuf::from("/work/proj/.claude-mpm/resume-logs")
        );

        let mut absolute = ContextConfig::default();
        absolute.resume_logs.storage_dir = PathBuf::from("/var/lib/mpm");
        assert_eq!(
            absolute.storage_dir(Path::new("/work/proj")),
            PathBuf::from("/var/lib/mpm")
        );
    }

    #[test]
    fn test_enabled_triggers_parse_all_defaults() {
        let config = ContextConfig::default();
        let kinds = config.enabled_triggers();
        assert_eq!(kinds.len(), 5);
        assert!(kinds.contains(&TriggerKind::ManualPause));
        assert!(kinds.contains(&TriggerKind::MaxTokens));
    }

    #[test]
    fn test_resolve_default_project_is_valid() {
        let dir = tempdir().unwrap();
        let config = ContextConfig::resolve(dir.path()).unwrap();
        assert_eq!(config.budget_total, 200_000);
    }
}
