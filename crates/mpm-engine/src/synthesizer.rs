//! Builds a resume log within strict per-section token budgets.
//!
//! Each section is summarized by the external collaborator, re-asked on
//! overrun up to three attempts, then hard-truncated as a last resort.
//! Transient summarizer errors retry with exponential backoff; permanent
//! ones substitute a stub so synthesis always completes structurally.

use crate::session_state::SessionState;
use crate::summarizer::Summarizer;
use chrono::{DateTime, TimeDelta, Utc};
use mpm_core::{
    estimate_tokens, EngineError, Result, SectionName, SummarizerError, TriggerEvent,
};
use mpm_resume::{ResumeLog, Section, SCHEMA_VERSION};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Max summarizer calls per section, counting both error retries and
/// overrun re-asks.
const MAX_ATTEMPTS: u32 = 3;

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_FACTOR: u64 = 2;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Synthesizer {
    summarizer: Arc<dyn Summarizer>,
    allocations: Vec<(SectionName, u32)>,
    max_total_tokens: u32,
    call_timeout: Duration,
}

impl Synthesizer {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        allocations: Vec<(SectionName, u32)>,
        max_total_tokens: u32,
    ) -> Self {
        Self {
            summarizer,
            allocations,
            max_total_tokens,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Validate the per-section budgets: each at least 200 tokens, the sum
    /// within the per-log cap.
    pub fn validate_allocations(&self) -> Result<()> {
        for (section, budget) in &self.allocations {
            if *budget < 200 {
                return Err(EngineError::InvalidAllocation(format!(
                    "section {section} allocated {budget} tokens, minimum is 200"
                )));
            }
        }
        let total: u32 = self.allocations.iter().map(|(_, b)| b).sum();
        if total > self.max_total_tokens {
            return Err(EngineError::InvalidAllocation(format!(
                "section budgets sum to {total}, exceeding the {} token cap",
                self.max_total_tokens
            )));
        }
        Ok(())
    }

    /// Build a complete resume log for the trigger.
    ///
    /// `created_at_floor` is the previous generation's timestamp; the new
    /// log is stamped strictly after it even when the clock has not
    /// advanced past second resolution.
    pub async fn synthesize(
        &self,
        state: &SessionState,
        trigger: &TriggerEvent,
        token_budget_total: u32,
        tokens_at_generation: u32,
        created_at_floor: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<ResumeLog> {
        self.validate_allocations()?;

        // Truncate to whole seconds; the wire format and file names carry
        // second resolution.
        let wall = Utc::now();
        let now = DateTime::<Utc>::from_timestamp(wall.timestamp(), 0).unwrap_or(wall);
        let created_at = match created_at_floor {
            Some(floor) if now <= floor => floor + TimeDelta::seconds(1),
            _ => now,
        };

        let mut sections = Vec::with_capacity(self.allocations.len());
        let mut prior_context = String::new();

        for (section, budget) in &self.allocations {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let content = if *section == SectionName::ContextMetrics {
                render_context_metrics(
                    state,
                    trigger,
                    created_at,
                    token_budget_total,
                    tokens_at_generation,
                )
            } else {
                self.summarize_section(state, *section, *budget, &prior_context, cancel)
                    .await?
            };

            // Trailing whitespace never survives persistence; trimming here
            // keeps the in-memory value equal to its persisted round-trip.
            let content = sanitize_content(content.trim_end());
            // Each section seeds the next call's prior context.
            prior_context = content.clone();
            sections.push(Section::new(*section, content));
        }

        Ok(ResumeLog {
            schema_version: SCHEMA_VERSION,
            session_id: state.session_id.clone(),
            parent_session_id: state.parent_session_id.clone(),
            created_at,
            project_path: state.project_path.clone(),
            git_branch: state.git_branch.clone(),
            token_budget_total,
            tokens_at_generation,
            trigger: trigger.kind.as_str().to_string(),
            sections,
        })
    }

    /// One section through the attempt loop: accept in-budget output,
    /// re-ask on overrun, back off on transient errors, stub on permanent
    /// failure, hard-truncate when attempts are spent.
    async fn summarize_section(
        &self,
        state: &SessionState,
        section: SectionName,
        budget: u32,
        prior_context: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let slice = state.slice_for(section, budget);
        let mut last_overrun: Option<String> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let call = self
                .summarizer
                .summarize(section, budget, &slice, prior_context);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                result = tokio::time::timeout(self.call_timeout, call) => {
                    result.unwrap_or(Err(SummarizerError::Timeout(self.call_timeout.as_secs())))
                }
            };

            match outcome {
                Ok(text) => {
                    if estimate_tokens(&text) as u32 <= budget {
                        return Ok(text);
                    }
                    tracing::debug!(
                        %section,
                        attempt,
                        tokens = estimate_tokens(&text),
                        budget,
                        "summarizer output over budget"
                    );
                    last_overrun = Some(text);
                }
                Err(error) if error.is_transient() && attempt < MAX_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(%section, attempt, %error, ?delay, "transient summarizer error");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => {
                    tracing::warn!(%section, attempt, %error, "section unavailable");
                    return Ok(format!("[section unavailable: {error}]"));
                }
            }
        }

        // All attempts overran; hard-truncate the last output.
        let text = last_overrun.unwrap_or_default();
        let truncated = truncate_to_tokens(&text, budget);
        let warning = EngineError::OversizeSection {
            section: section.to_string(),
            tokens: estimate_tokens(&text) as u32,
            budget,
        };
        tracing::warn!(%warning, "hard-truncated oversize section");
        Ok(truncated)
    }
}

/// Exponential backoff with +/-25% jitter: base 500ms, factor 2.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS * BACKOFF_FACTOR.pow(attempt.saturating_sub(1));
    let jitter = rand::rng().random_range(0.75..=1.25);
    Duration::from_millis((base as f64 * jitter) as u64)
}

/// Longest prefix (on a char boundary) whose token estimate fits `budget`,
/// found by binary search.
pub(crate) fn truncate_to_tokens(text: &str, budget: u32) -> String {
    if estimate_tokens(text) as u32 <= budget {
        return text.trim_end().to_string();
    }

    let boundaries: Vec<usize> = text.char_indices().map(|(idx, _)| idx).collect();
    let mut lo = 0usize;
    let mut hi = boundaries.len();

    while lo < hi {
        let mid = (lo + hi).div_ceil(2);
        let end = boundaries.get(mid).copied().unwrap_or(text.len());
        if estimate_tokens(&text[..end]) as u32 <= budget {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    let end = boundaries.get(lo).copied().unwrap_or(text.len());
    text[..end].trim_end().to_string()
}

/// Demote content lines that would collide with section headings in the
/// wire format.
fn sanitize_content(content: &str) -> String {
    let needs_fix = content.lines().any(is_heading_collision);
    if !needs_fix {
        return content.to_string();
    }
    content
        .lines()
        .map(|line| {
            if is_heading_collision(line) {
                format!("#{line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_heading_collision(line: &str) -> bool {
    line.strip_prefix("## ")
        .is_some_and(|rest| SectionName::ALL.iter().any(|name| name.as_str() == rest))
}

/// Deterministic ContextMetrics block; no free-form text.
fn render_context_metrics(
    state: &SessionState,
    trigger: &TriggerEvent,
    created_at: DateTime<Utc>,
    token_budget_total: u32,
    tokens_at_generation: u32,
) -> String {
    let mut lines = vec![format!("session_id: {}", state.session_id)];
    if let Some(parent) = &state.parent_session_id {
        lines.push(format!("parent_session_id: {parent}"));
    }
    lines.push(format!(
        "created_at: {}",
        created_at.format("%Y-%m-%dT%H:%M:%SZ")
    ));
    lines.push(format!("trigger: {}", trigger.kind));
    lines.push(format!(
        "occupancy_at_fire: {:.4}",
        trigger.occupancy_at_fire
    ));
    lines.push(format!("token_budget_total: {token_budget_total}"));
    lines.push(format!("tokens_at_generation: {tokens_at_generation}"));
    lines.join("\n")
}
