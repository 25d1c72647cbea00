use thiserror::Error;

use crate::types::{ReplayId, Tick};

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid tick: expected {expected}, got {actual}")]
    TickMismatch { expected: Tick, actual: Tick },

    #[error("Initialization failed: {reason}")]
    Initialization { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Unknown agent '{agent}'")]
    UnknownAgent { agent: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SimResult<T> = Result<T, SimError>;

/// Failures of latency-bearing collaborators (reasoning, similarity,
/// summaries). Always recovered locally; never reaches a `decide` caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExternalError {
    #[error("external call timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("external call returned status {code}")]
    Status { code: u16 },

    #[error("external call was rate limited")]
    RateLimited,

    #[error("malformed external response: {reason}")]
    Malformed { reason: String },

    #[error("external collaborator unavailable: {reason}")]
    Unavailable { reason: String },
}

/// A suggestion from the reasoning collaborator that cannot be used.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("suggested action {action} is not legal: {reason}")]
    Illegal { action: String, reason: String },
}

/// Errors surfaced by the replay service boundary.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Replay generation failed: {reason}")]
    Generation { reason: String },

    #[error("Replay '{replay_id}' not found")]
    NotFound { replay_id: ReplayId },

    #[error("Replay storage error: {0}")]
    Storage(#[from] SimError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
