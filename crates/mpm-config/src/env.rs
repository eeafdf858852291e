//! Environment-variable overrides.
//!
//! Environment takes precedence over the config file. Unparsable values are
//! collected as validation errors naming the variable, never ignored.

use crate::config::ContextConfig;
use std::path::PathBuf;

pub const ENV_BUDGET_TOTAL: &str = "CLAUDE_MPM_BUDGET_TOTAL";
pub const ENV_RESUME_LOGS_ENABLED: &str = "CLAUDE_MPM_RESUME_LOGS_ENABLED";
pub const ENV_RESUME_LOGS_MAX_TOKENS: &str = "CLAUDE_MPM_RESUME_LOGS_MAX_TOKENS";
pub const ENV_RESUME_LOGS_STORAGE_DIR: &str = "CLAUDE_MPM_RESUME_LOGS_STORAGE_DIR";

/// Apply overrides from the process environment. Returns parse errors.
pub fn apply_env_overrides(config: &mut ContextConfig) -> Vec<String> {
    let vars: Vec<(String, String)> = [
        ENV_BUDGET_TOTAL,
        ENV_RESUME_LOGS_ENABLED,
        ENV_RESUME_LOGS_MAX_TOKENS,
        ENV_RESUME_LOGS_STORAGE_DIR,
    ]
    .iter()
    .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
    .collect();

    apply_env_overrides_from(config, &vars)
}

/// Apply overrides from an explicit variable list (testable without
/// mutating the process environment).
pub fn apply_env_overrides_from(
    config: &mut ContextConfig,
    vars: &[(String, String)],
) -> Vec<String> {
    let mut errors = Vec::new();

    for (name, value) in vars {
        match name.as_str() {
            ENV_BUDGET_TOTAL => match value.parse::<u32>() {
                Ok(total) => config.budget_total = total,
                Err(_) => errors.push(format!(
                    "{ENV_BUDGET_TOTAL}: expected an unsigned integer (got '{value}')"
                )),
            },
            ENV_RESUME_LOGS_ENABLED => match parse_bool(value) {
                Some(enabled) => config.resume_logs.enabled = enabled,
                None => errors.push(format!(
                    "{ENV_RESUME_LOGS_ENABLED}: expected true/false (got '{value}')"
                )),
            },
            ENV_RESUME_LOGS_MAX_TOKENS => match value.parse::<u32>() {
                Ok(max) => config.resume_logs.max_tokens = max,
                Err(_) => errors.push(format!(
                    "{ENV_RESUME_LOGS_MAX_TOKENS}: expected an unsigned integer (got '{value}')"
                )),
            },
            ENV_RESUME_LOGS_STORAGE_DIR => {
                if value.is_empty() {
                    errors.push(format!("{ENV_RESUME_LOGS_STORAGE_DIR}: must not be empty"));
                } else {
                    config.resume_logs.storage_dir = PathBuf::from(value);
                }
            }
            other => errors.push(format!("unrecognized override '{other}'")),
        }
    }

    errors
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
