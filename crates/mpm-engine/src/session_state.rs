//! Read-only view of the session handed to the synthesizer.

use mpm_core::SectionName;
use std::path::PathBuf;

/// What the host knows about the running session. The synthesizer only
/// reads from this; ownership stays with the engine.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub session_id: String,
    /// Session this one continues from, if it was rehydrated.
    pub parent_session_id: Option<String>,
    pub project_path: PathBuf,
    pub git_branch: Option<String>,
    /// Raw transcript text accumulated so far.
    pub transcript: String,
    /// Decisions the host recorded explicitly, newest last.
    pub recent_decisions: Vec<String>,
    /// Open tasks the host recorded explicitly, newest last.
    pub open_tasks: Vec<String>,
}

impl SessionState {
    /// The transcript slice relevant to a section, bounded so prompts stay
    /// proportional to the section budget (~4 chars per token).
    pub fn slice_for(&self, section: SectionName, target_tokens: u32) -> String {
        let max_chars = target_tokens as usize * 16;
        match section {
            SectionName::Decisions if !self.recent_decisions.is_empty() => {
                tail(&self.recent_decisions.join("\n"), max_chars)
            }
            SectionName::NextSteps if !self.open_tasks.is_empty() => {
                tail(&self.open_tasks.join("\n"), max_chars)
            }
            _ => tail(&self.transcript, max_chars),
        }
    }
}

/// Last `max_chars` of a string, cut on a char boundary.
fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
