//! Error types for configuration and compiler invocation.

use thiserror::Error;

/// Errors raised while resolving parameters, probing the compiler, or
/// assembling the test configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
