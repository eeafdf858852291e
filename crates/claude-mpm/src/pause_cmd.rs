//! `mpm pause`: fire a manual pause and wait for the log to commit.

use anyhow::{Context, Result};
use mpm_config::ContextConfig;
use mpm_core::EngineError;
use mpm_engine::{ApiSummarizer, ContextEngine, ExcerptSummarizer, Summarizer};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const EXIT_OK: i32 = 0;
pub const EXIT_DISABLED: i32 = 2;
pub const EXIT_SYNTH_FAILED: i32 = 3;

const ENV_SUMMARIZER_BASE_URL: &str = "CLAUDE_MPM_SUMMARIZER_BASE_URL";
const ENV_SUMMARIZER_API_KEY: &str = "CLAUDE_MPM_SUMMARIZER_API_KEY";
const ENV_SUMMARIZER_MODEL: &str = "CLAUDE_MPM_SUMMARIZER_MODEL";

/// Pick the configured HTTP summarizer, or the deterministic excerpting
/// fallback when no endpoint is set.
pub fn build_summarizer() -> Arc<dyn Summarizer> {
    let base_url = std::env::var(ENV_SUMMARIZER_BASE_URL).ok();
    let api_key = std::env::var(ENV_SUMMARIZER_API_KEY).ok();
    match (base_url, api_key) {
        (Some(base_url), Some(api_key)) => {
            let model = std::env::var(ENV_SUMMARIZER_MODEL)
                .unwrap_or_else(|_| "gpt-4o-mini".to_string());
            tracing::debug!(%model, "using HTTP summarizer");
            Arc::new(ApiSummarizer::new(base_url, api_key, model))
        }
        _ => Arc::new(ExcerptSummarizer),
    }
}

pub async fn handle_pause(transcript: Option<PathBuf>, project_root: &Path) -> Result<i32> {
    let config = ContextConfig::resolve(project_root)?;

    let engine = match ContextEngine::bootstrap(&config, project_root, build_summarizer()) {
        Ok(engine) => engine,
        Err(err @ EngineError::ConcurrentWriter { .. }) => return Err(err.into()),
        Err(err) => return Err(err).context("failed to initialize context engine"),
    };

    engine.set_git_branch(crate::git::detect_branch(project_root));
    if let Some(path) = transcript {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read transcript: {}", path.display()))?;
        engine.append_transcript(&text);
    }

    match engine.pause().await {
        Ok(Some(log_ref)) => {
            println!("{}", log_ref.path.display());
            Ok(EXIT_OK)
        }
        Ok(None) => {
            eprintln!("manual_pause trigger is not enabled for this project");
            Ok(EXIT_DISABLED)
        }
        Err(EngineError::Disabled) => {
            eprintln!("resume logs are disabled");
            Ok(EXIT_DISABLED)
        }
        Err(error) => {
            eprintln!("resume log generation failed: {error}");
            Ok(EXIT_SYNTH_FAILED)
        }
    }
}
