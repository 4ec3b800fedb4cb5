//! Error type for the harness layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] cxxsuite_config::ConfigError),
    #[error("{0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
