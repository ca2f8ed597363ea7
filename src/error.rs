use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rule not found: {name} (available: {available})")]
    RuleNotFound { name: String, available: String },

    #[error("invalid custom file {path}: {reason}")]
    InvalidCustomFile { path: String, reason: String },

    #[error("no rules, custom files, or custom prompt specified")]
    NoWorkSpecified,

    #[error("custom prompt exceeds {limit} character limit (current: {length})")]
    PromptTooLong { length: usize, limit: usize },

    #[error("unsupported agent: {name} (supported: {supported})")]
    UnsupportedAgent { name: String, supported: String },

    #[error("invocation '{variant}' failed: {reason}")]
    InvocationFailed { variant: String, reason: String },

    #[error("{agent}: no invocation strategy succeeded ({attempts} attempted)")]
    AllInvocationsFailed { agent: String, attempts: usize },

    #[error("scope detection exhausted: {0}")]
    ScopeDetectionExhausted(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("github error: {0}")]
    GitHub(String),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("results error: {0}")]
    Results(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("process timed out after {timeout:?}")]
    ProcessTimeout {
        timeout: std::time::Duration,
        stdout_lines: Vec<String>,
        stderr_lines: Vec<String>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
