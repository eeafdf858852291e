//! ULID session identifiers.

use crate::error::{EngineError, Result};

/// Generate a new ULID session ID.
pub fn new_session_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Validate that a string is a valid ULID.
pub fn validate_session_id(id: &str) -> Result<()> {
    if id.len() != 26 {
        return Err(EngineError::InvalidInput(format!(
            "invalid session ID '{}': expected 26 characters, got {}",
            id,
            id.len()
        )));
    }

    ulid::Ulid::from_string(id).map_err(|_| {
        EngineError::InvalidInput(format!("invalid session ID '{id}': not a valid ULID"))
    })?;

    Ok(())
}

/// Short form of a session ID used in log file names.
pub fn short_session_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(8)
        .map(|(idx, _)| idx)
        .unwrap_or(id.len());
    &id[..end]
}
