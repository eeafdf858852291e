//! Resume log value type and its wire format.
//!
//! A persisted log is UTF-8 text with Unix line endings: a frontmatter
//! block delimited by `---` lines, Markdown sections introduced by
//! `## {SectionName}` in fixed order, and a trailing
//! `<!-- checksum: {64-hex} -->` as the last non-whitespace line.
//!
//! The checksum covers the canonical form: header lines with keys sorted
//! lexicographically, sections in fixed order, each content block stripped
//! of trailing whitespace, `\n\n` between blocks.

use chrono::{DateTime, NaiveDateTime, Utc};
use mpm_core::{estimate_tokens, validate_session_id, EngineError, Result, SectionName};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: u16 = 1;

const FRONTMATTER_DELIM: &str = "---";
const CHECKSUM_PREFIX: &str = "<!-- checksum: ";
const CHECKSUM_SUFFIX: &str = " -->";

/// One bounded section of a resume log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: SectionName,
    pub token_count: u32,
    pub content: String,
}

impl Section {
    pub fn new(name: SectionName, content: String) -> Self {
        let token_count = estimate_tokens(&content) as u32;
        Self {
            name,
            token_count,
            content,
        }
    }
}

/// A structured, bounded-token session summary. Immutable once persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeLog {
    pub schema_version: u16,
    pub session_id: String,
    pub parent_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub project_path: PathBuf,
    pub git_branch: Option<String>,
    pub token_budget_total: u32,
    pub tokens_at_generation: u32,
    pub trigger: String,
    pub sections: Vec<Section>,
}

impl ResumeLog {
    /// Sum of section token counts; the preload cost of this log.
    pub fn total_section_tokens(&self) -> u32 {
        self.sections.iter().map(|s| s.token_count).sum()
    }

    /// Header lines in canonical (lexicographic) key order. Absent optional
    /// keys are omitted entirely.
    fn header_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "created_at: {}",
            self.created_at.format("%Y-%m-%dT%H:%M:%SZ")
        )];
        if let Some(branch) = &self.git_branch {
            lines.push(format!("git_branch: {branch}"));
        }
        if let Some(parent) = &self.parent_session_id {
            lines.push(format!("parent_session_id: {parent}"));
        }
        lines.push(format!("project_path: {}", self.project_path.display()));
        lines.push(format!("schema_version: {}", self.schema_version));
        lines.push(format!("session_id: {}", self.session_id));
        lines.push(format!("token_budget_total: {}", self.token_budget_total));
        lines.push(format!(
            "tokens_at_generation: {}",
            self.tokens_at_generation
        ));
        lines.push(format!("trigger: {}", self.trigger));
        lines
    }

    /// Canonical serialization the checksum is computed over.
    pub fn canonical(&self) -> String {
        let mut blocks = vec![self.header_lines().join("\n")];
        for section in &self.sections {
            blocks.push(format!(
                "## {}\n{}",
                section.name,
                section.content.trim_end()
            ));
        }
        blocks.join("\n\n")
    }

    /// Hex SHA-256 of the canonical serialization.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Render the full persisted file.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(FRONTMATTER_DELIM);
        out.push('\n');
        for line in self.header_lines() {
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str(FRONTMATTER_DELIM);
        out.push('\n');
        for section in &self.sections {
            out.push('\n');
            out.push_str(&format!("## {}\n", section.name));
            out.push_str(section.content.trim_end());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&format!(
            "{CHECKSUM_PREFIX}{}{CHECKSUM_SUFFIX}\n",
            self.checksum()
        ));
        out
    }

    /// Parse a persisted log and verify its checksum. `path` is only used
    /// for error reporting.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let corrupt = |reason: &str| EngineError::CorruptLog {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let mut lines = text.lines();
        if lines.next() != Some(FRONTMATTER_DELIM) {
            return Err(corrupt("missing frontmatter open delimiter"));
        }

        // Header block
        let mut header: Vec<(String, String)> = Vec::new();
        loop {
            match lines.next() {
                Some(FRONTMATTER_DELIM) => break,
                Some(line) => {
                    let (key, value) = line
                        .split_once(": ")
                        .ok_or_else(|| corrupt(&format!("malformed header line '{line}'")))?;
                    header.push((key.to_string(), value.to_string()));
                }
                None => return Err(corrupt("unterminated frontmatter block")),
            }
        }

        let get = |key: &str| -> Option<String> {
            header
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        let created_at_raw = get("created_at").ok_or_else(|| corrupt("missing created_at"))?;
        let created_at = parse_created_at(&created_at_raw)
            .ok_or_else(|| corrupt(&format!("invalid created_at '{created_at_raw}'")))?;

        let schema_version: u16 = get("schema_version")
            .ok_or_else(|| corrupt("missing schema_version"))?
            .parse()
            .map_err(|_| corrupt("invalid schema_version"))?;

        let session_id = get("session_id").ok_or_else(|| corrupt("missing session_id"))?;
        validate_session_id(&session_id)
            .map_err(|_| corrupt(&format!("invalid session_id '{session_id}'")))?;
        let project_path = PathBuf::from(
            get("project_path").ok_or_else(|| corrupt("missing project_path"))?,
        );
        let token_budget_total: u32 = get("token_budget_total")
            .ok_or_else(|| corrupt("missing token_budget_total"))?
            .parse()
            .map_err(|_| corrupt("invalid token_budget_total"))?;
        let tokens_at_generation: u32 = get("tokens_at_generation")
            .ok_or_else(|| corrupt("missing tokens_at_generation"))?
            .parse()
            .map_err(|_| corrupt("invalid tokens_at_generation"))?;
        let trigger = get("trigger").ok_or_else(|| corrupt("missing trigger"))?;
        let git_branch = get("git_branch");
        let parent_session_id = get("parent_session_id");

        // Body: sections in fixed order, then the checksum trailer.
        let mut sections: Vec<Section> = Vec::new();
        let mut current: Option<(SectionName, Vec<&str>)> = None;
        let mut stored_checksum: Option<String> = None;
        let mut next_order = 0usize;

        for line in lines {
            if let Some(hex) = line
                .strip_prefix(CHECKSUM_PREFIX)
                .and_then(|rest| rest.strip_suffix(CHECKSUM_SUFFIX))
            {
                stored_checksum = Some(hex.to_string());
                continue;
            }
            if stored_checksum.is_some() && !line.trim().is_empty() {
                return Err(corrupt("content after checksum trailer"));
            }

            if let Some(rest) = line.strip_prefix("## ") {
                if let Some(position) = SectionName::ALL
                    .iter()
                    .position(|name| name.as_str() == rest)
                {
                    if position < next_order {
                        return Err(corrupt(&format!(
                            "section '{rest}' out of order or duplicated"
                        )));
                    }
                    if let Some((name, body)) = current.take() {
                        sections.push(Section::new(name, body.join("\n").trim_end().to_string()));
                    }
                    current = Some((SectionName::ALL[position], Vec::new()));
                    next_order = position + 1;
                    continue;
                }
            }

            if let Some((_, body)) = current.as_mut() {
                body.push(line);
            } else if !line.trim().is_empty() {
                return Err(corrupt(&format!("unexpected content before sections: '{line}'")));
            }
        }

        if let Some((name, body)) = current.take() {
            sections.push(Section::new(name, body.join("\n").trim_end().to_string()));
        }

        let stored_checksum = stored_checksum.ok_or_else(|| corrupt("missing checksum trailer"))?;

        let log = ResumeLog {
            schema_version,
            session_id,
            parent_session_id,
            created_at,
            project_path,
            git_branch,
            token_budget_total,
            tokens_at_generation,
            trigger,
            sections,
        };

        let actual = log.checksum();
        if actual != stored_checksum {
            return Err(corrupt(&format!(
                "checksum mismatch (stored {stored_checksum}, computed {actual})"
            )));
        }

        Ok(log)
    }
}

fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%SZ")
        .ok()
        .map(|naive| naive.and_utc())
}
