//! Config validation. Collects every offending key instead of stopping at
//! the first, so a single failed startup names all problems at once.

use crate::config::ContextConfig;
use mpm_core::TriggerKind;

const MIN_BUDGET_TOTAL: u32 = 1_000;
const MIN_SECTION_TOKENS: u32 = 200;

/// Validate a resolved configuration. Returns one message per offense;
/// an empty vec means the config is valid.
pub fn validate_config(config: &ContextConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.budget_total < MIN_BUDGET_TOTAL {
        errors.push(format!(
            "budget_total: must be >= {MIN_BUDGET_TOTAL} (got {})",
            config.budget_total
        ));
    }

    validate_thresholds(config, &mut errors);
    validate_triggers(config, &mut errors);
    validate_allocation(config, &mut errors);

    if config.resume_logs.storage_dir.as_os_str().is_empty() {
        errors.push("resume_logs.storage_dir: must not be empty".to_string());
    }

    errors
}

fn validate_thresholds(config: &ContextConfig, errors: &mut Vec<String>) {
    let t = config.thresholds;

    if t.caution <= 0.0 {
        errors.push(format!(
            "thresholds.caution: must be > 0 (got {})",
            t.caution
        ));
    }
    if t.critical >= 1.0 {
        errors.push(format!(
            "thresholds.critical: must be < 1.0 (got {})",
            t.critical
        ));
    }
    if t.caution >= t.warning {
        errors.push(format!(
            "thresholds.warning: must be > thresholds.caution ({} >= {})",
            t.caution, t.warning
        ));
    }
    if t.warning >= t.critical {
        errors.push(format!(
            "thresholds.critical: must be > thresholds.warning ({} >= {})",
            t.warning, t.critical
        ));
    }
}

fn validate_triggers(config: &ContextConfig, errors: &mut Vec<String>) {
    let known: Vec<&str> = TriggerKind::CONFIGURABLE.iter().map(|k| k.as_str()).collect();
    for name in &config.resume_logs.triggers {
        if TriggerKind::from_config_name(name).is_none() {
            errors.push(format!(
                "resume_logs.triggers: unknown trigger '{name}' (known: {})",
                known.join(", ")
            ));
        }
    }
}

fn validate_allocation(config: &ContextConfig, errors: &mut Vec<String>) {
    let allocation = config.resume_logs.token_allocation;

    for (section, budget) in allocation.per_section() {
        if budget < MIN_SECTION_TOKENS {
            errors.push(format!(
                "resume_logs.token_allocation.{}: must be >= {MIN_SECTION_TOKENS} (got {budget})",
                snake_case(section.as_str())
            ));
        }
    }

    let total = allocation.total();
    if total > config.resume_logs.max_tokens {
        errors.push(format!(
            "resume_logs.token_allocation: section budgets sum to {total}, exceeding resume_logs.max_tokens ({})",
            config.resume_logs.max_tokens
        ));
    }
}

fn snake_case(pascal: &str) -> String {
    let mut out = String::with_capacity(pascal.len() + 2);
    for (i, ch) in pascal.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
