//! Configuration resolution for the context budget engine.
//!
//! Precedence: environment variables > `.claude-mpm/config.toml` > defaults.
//! Unknown keys are rejected; validation is fatal at initialization and
//! enumerates every offending key.

pub mod config;
pub mod env;
pub mod validate;

pub use config::{
    CleanupConfig, ContextConfig, ResumeLogsConfig, Thresholds, TokenAllocation, CONFIG_DIR_NAME,
    CONFIG_FILE_NAME,
};
pub use env::{apply_env_overrides, apply_env_overrides_from};
pub use validate::validate_config;
