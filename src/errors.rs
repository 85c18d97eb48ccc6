// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::TaskKind;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid agent id: {0}")]
    InvalidAgentId(String),

    #[error("Fleet backend error: {0}")]
    Backend(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Unexpected result batch: expected {expected:?} results, got {got:?}")]
    UnexpectedBatch { expected: TaskKind, got: TaskKind },

    #[error("Polling gave up after {attempts} consecutive failures: {last_error}")]
    PollRetriesExhausted { attempts: u32, last_error: String },

    #[error("File transfer error: {0}")]
    Transfer(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ReconError>;
