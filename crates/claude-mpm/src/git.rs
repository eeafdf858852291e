//! Git branch capture for log metadata. Non-fatal: a project without git
//! simply gets no branch recorded.

use std::path::Path;
use std::process::Command;

/// Current branch name, or None outside a repository or on detached HEAD.
pub fn detect_branch(project_root: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(project_root)
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if branch.is_empty() || branch == "HEAD" {
                None
            } else {
                Some(branch)
            }
        }
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("git branch detection failed: {e}");
            None
        }
    }
}
