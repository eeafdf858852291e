//! Shared types and error taxonomy for the context budget engine.

pub mod error;
pub mod session_id;
pub mod tokens;
pub mod types;

pub use error::{EngineError, Result, SummarizerError};
pub use session_id::{new_session_id, short_session_id, validate_session_id};
pub use tokens::estimate_tokens;
pub use types::{SectionName, ThresholdLevel, TriggerEvent, TriggerKind};
