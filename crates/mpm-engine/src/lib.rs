//! Resume log generation: summarizer clients, synthesizer, trigger
//! dispatch and the engine facade owned by a session.

pub mod dispatcher;
pub mod engine;
pub mod session_state;
pub mod summarizer;
pub mod synthesizer;

pub use dispatcher::{Decision, TriggerDispatcher};
pub use engine::{ContextEngine, RecordOutcome, StatusReport};
pub use session_state::SessionState;
pub use summarizer::{ApiSummarizer, ExcerptSummarizer, Summarizer};
pub use synthesizer::Synthesizer;
