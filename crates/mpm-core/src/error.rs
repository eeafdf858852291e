use std::path::PathBuf;

/// Errors surfaced by the summarizer collaborator.
///
/// `RateLimited` and `Timeout` are transient and retried by the synthesizer;
/// `Permanent` is fatal to the section being summarized.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SummarizerError {
    #[error("summarizer rate limited: {0}")]
    RateLimited(String),

    #[error("summarizer timed out after {0}s")]
    Timeout(u64),

    #[error("summarizer failed: {0}")]
    Permanent(String),
}

impl SummarizerError {
    /// Whether the synthesizer's retry policy applies to this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Timeout(_))
    }
}

/// Error taxonomy for the context budget engine.
///
/// Only `InvalidConfig` and `ConcurrentWriter` are fatal at initialization;
/// every other variant is recovered locally by its component.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration:\n  {}", .0.join("\n  "))]
    InvalidConfig(Vec<String>),

    #[error("Ledger already initialized: preload must precede any recorded usage")]
    AlreadyInitialized,

    #[error("Invalid section allocation: {0}")]
    InvalidAllocation(String),

    #[error(transparent)]
    Summarizer(#[from] SummarizerError),

    #[error("Section '{section}' still exceeds its budget after retries ({tokens} > {budget} tokens)")]
    OversizeSection {
        section: String,
        tokens: u32,
        budget: u32,
    },

    #[error("Corrupt resume log {}: {reason}", path.display())]
    CorruptLog { path: PathBuf, reason: String },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resume log directory locked by live session {session_id} (PID {pid})")]
    ConcurrentWriter { session_id: String, pid: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Context engine is disabled")]
    Disabled,
}

impl EngineError {
    /// Whether this error must abort process startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::ConcurrentWriter { .. })
    }
}

/// Convenience alias used across the engine crates.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_input() {
        let err = EngineError::InvalidInput("negative token count".into());
        assert_eq!(err.to_string(), "Invalid input: negative token count");
    }

    #[test]
    fn test_display_invalid_config_enumerates_keys() {
        let err = EngineError::InvalidConfig(vec![
            "thresholds.caution: must be > 0 (got 0)".into(),
            "budget_total: must be >= 1000 (got 10)".into(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("thresholds.caution"));
        assert!(msg.contains("budget_total"));
    }

    #[test]
    fn test_display_already_initialized() {
        assert_eq!(
            EngineError::AlreadyInitialized.to_string(),
            "Ledger already initialized: preload must precede any recorded usage"
        );
    }

    #[test]
    fn test_display_oversize_section() {
        let err = EngineError::OversizeSection {
            section: "KeyFindings".into(),
            tokens: 3000,
            budget: 2500,
        };
        assert_eq!(
            err.to_string(),
            "Section 'KeyFindings' still exceeds its budget after retries (3000 > 2500 tokens)"
        );
    }

    #[test]
    fn test_display_corrupt_log() {
        let err = EngineError::CorruptLog {
            path: PathBuf::from("/tmp/x.md"),
            reason: "checksum mismatch".into(),
        };
        assert_eq!(
            err.to_string(),
            "Corrupt resume log /tmp/x.md: checksum mismatch"
        );
    }

    #[test]
    fn test_display_concurrent_writer() {
        let err = EngineError::ConcurrentWriter {
            session_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".into(),
            pid: 4242,
        };
        assert!(err.to_string().contains("PID 4242"));
        assert!(err.to_string().contains("01ARZ3NDEKTSV4RRFFQ69G5FAV"));
    }

    #[test]
    fn test_summarizer_transient_classification() {
        assert!(SummarizerError::RateLimited("429".into()).is_transient());
        assert!(SummarizerError::Timeout(30).is_transient());
        assert!(!SummarizerError::Permanent("model refused".into()).is_transient());
    }

    #[test]
    fn test_summarizer_error_converts() {
        let err: EngineError = SummarizerError::Permanent("refused".into()).into();
        assert_eq!(err.to_string(), "summarizer failed: refused");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(EngineError::InvalidConfig(vec![]).is_fatal());
        assert!(
            EngineError::ConcurrentWriter {
                session_id: "x".into(),
                pid: 1,
            }
            .is_fatal()
        );
        assert!(!EngineError::Cancelled.is_fatal());
        assert!(!EngineError::Disabled.is_fatal());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EngineError>();
        assert_send_sync::<SummarizerError>();
    }
}
