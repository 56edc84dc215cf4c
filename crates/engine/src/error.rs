//! Error types for the engine

use launchgate_common::FailureClass;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Common(#[from] launchgate_common::Error),

    /// Malformed rule, attempt definition, or configuration
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rule '{rule_id}': invalid pattern '{pattern}': {message}")]
    RegexCompile {
        rule_id: String,
        pattern: String,
        message: String,
    },

    #[error("Rule '{rule_id}': unknown operator '{operator}'")]
    UnknownOperator { rule_id: String, operator: String },

    #[error("Element not found: {target} ({class:?})")]
    ElementNotFound { target: String, class: FailureClass },

    #[error("Timeout after {after_ms} ms waiting for: {what}")]
    Timeout { what: String, after_ms: u64 },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Browser driver not available: {0}")]
    DriverUnavailable(String),

    #[error("Browser pool is closed")]
    PoolClosed,

    #[error("Unknown browser context: {0}")]
    UnknownContext(u64),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Fatal errors abort the whole run; everything else stays local to one attempt
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Common(e) => e.is_fatal(),
            EngineError::Validation(_)
            | EngineError::RegexCompile { .. }
            | EngineError::UnknownOperator { .. }
            | EngineError::UnknownPreset(_)
            | EngineError::DriverUnavailable(_) => true,
            _ => false,
        }
    }

    /// Failure classification for retry decisions
    pub fn failure_class(&self) -> FailureClass {
        match self {
            EngineError::ElementNotFound { class, .. } => *class,
            EngineError::AssertionFailed(_) | EngineError::Common(_) => FailureClass::Deterministic,
            _ => FailureClass::Transient,
        }
    }
}
