//! Summarizer collaborators.
//!
//! The engine never calls a model itself; it hands each section's prompt,
//! budget and transcript slice to a [`Summarizer`]. `ApiSummarizer` talks to
//! an OpenAI-compatible `chat/completions` endpoint; `ExcerptSummarizer` is
//! the deterministic fallback when no endpoint is configured.

use async_trait::async_trait;
use mpm_core::{SectionName, SummarizerError};
use reqwest::StatusCode;
use serde_json::{json, Value};

/// Per-section summarization, bounded by a token target.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        section: SectionName,
        target_tokens: u32,
        transcript_slice: &str,
        prior_context: &str,
    ) -> Result<String, SummarizerError>;
}

/// Fixed prompt for a section. The closed mapping is part of the engine,
/// not configuration.
pub fn prompt_for(section: SectionName) -> &'static str {
    match section {
        SectionName::ContextMetrics => "", // built deterministically, never summarized
        SectionName::MissionSummary => {
            "Restate the session's top-level objective in one paragraph."
        }
        SectionName::Accomplishments => {
            "List completed items in order, each with a one-line rationale."
        }
        SectionName::KeyFindings => {
            "List discoveries that change future decisions, in order of impact."
        }
        SectionName::Decisions => {
            "List decisions as (choice, alternatives considered, rationale) triples."
        }
        SectionName::NextSteps => {
            "List remaining actions, each tagged with priority High, Medium or Low."
        }
        SectionName::CriticalContext => {
            "List invariants, constraints, file paths and endpoints required to resume. \
             Never include credentials."
        }
    }
}

/// HTTP client for an OpenAI-compatible chat completion endpoint.
#[derive(Debug)]
pub struct ApiSummarizer {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ApiSummarizer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Summarizer for ApiSummarizer {
    async fn summarize(
        &self,
        section: SectionName,
        target_tokens: u32,
        transcript_slice: &str,
        prior_context: &str,
    ) -> Result<String, SummarizerError> {
        let system_prompt = format!(
            "{} Stay under {target_tokens} tokens.",
            prompt_for(section)
        );
        let user_prompt = if prior_context.is_empty() {
            transcript_slice.to_string()
        } else {
            format!("Prior context:\n{prior_context}\n\nTranscript:\n{transcript_slice}")
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system_prompt},
                    {"role": "user", "content": user_prompt}
                ],
                "temperature": 0.1
            }))
            .send()
            .await
            .map_err(|e| SummarizerError::Permanent(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SummarizerError::Permanent(format!("failed to read body: {e}")))?;

        if status.is_success() {
            return parse_completion_content(&body);
        }

        if is_rate_or_quota_error(status, &body) {
            return Err(SummarizerError::RateLimited(format!("status {status}")));
        }

        Err(SummarizerError::Permanent(format!(
            "status {status}, body {body}"
        )))
    }
}

/// Deterministic fallback: excerpts the transcript slice verbatim. Used
/// when no summarizer endpoint is configured, so pause still produces a
/// structurally valid log.
#[derive(Debug, Default)]
pub struct ExcerptSummarizer;

#[async_trait]
impl Summarizer for ExcerptSummarizer {
    async fn summarize(
        &self,
        _section: SectionName,
        _target_tokens: u32,
        transcript_slice: &str,
        _prior_context: &str,
    ) -> Result<String, SummarizerError> {
        Ok(transcript_slice.trim().to_string())
    }
}

fn is_rate_or_quota_error(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }

    let body_lower = body.to_ascii_lowercase();
    body_lower.contains("rate_limit")
        || body_lower.contains("quota")
        || body_lower.contains("insufficient_quota")
}

fn parse_completion_content(body: &str) -> Result<String, SummarizerError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| SummarizerError::Permanent(format!("invalid response JSON: {e}")))?;
    value
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            SummarizerError::Permanent(
                "missing choices[0].message.content in completion response".to_string(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_summarized_section_has_a_prompt() {
        for section in SectionName::ALL {
            if section != SectionName::ContextMetrics {
                assert!(!prompt_for(section).is_empty(), "{section} needs a prompt");
            }
        }
    }

    #[test]
    fn test_parse_completion_content() {
        let body = r#"{"choices":[{"message":{"content":"a summary"}}]}"#;
        assert_eq!(parse_completion_content(body).unwrap(), "a summary");
    }

    #[test]
    fn test_parse_completion_content_missing_field() {
        let err = parse_completion_content(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, SummarizerError::Permanent(_)));
    }

    #[test]
    fn test_parse_completion_content_invalid_json() {
        let err = parse_completion_content("{nope").unwrap_err();
        assert!(matches!(err, SummarizerError::Permanent(_)));
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(is_rate_or_quota_error(StatusCode::TOO_MANY_REQUESTS, ""));
        assert!(is_rate_or_quota_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"insufficient_quota"}}"#
        ));
        assert!(!is_rate_or_quota_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "boom"
        ));
    }

    #[tokio::test]
    async fn test_excerpt_summarizer_returns_slice() {
        let summarizer = ExcerptSummarizer;
        let out = summarizer
            .summarize(SectionName::KeyFindings, 100, "  finding one\nfinding two  ", "")
            .await
            .unwrap();
        assert_eq!(out, "finding one\nfinding two");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = ApiSummarizer::new("https://api.example.com/v1/", "key", "model-a");
        assert_eq!(api.base_url, "https://api.example.com/v1");
    }
}
