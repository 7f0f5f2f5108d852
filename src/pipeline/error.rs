//! Error taxonomy for the replay pipeline
//!
//! Only `CorpusInvalid` and the control errors ever reach a caller of the
//! orchestrator. Scoring, persistence, broadcast and sweep failures are
//! recovered inside their stage, logged, and counted in `PipelineStats`.

use thiserror::Error;

/// Errors surfaced by pipeline construction and control commands
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("corpus invalid: {0}")]
    CorpusInvalid(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("pipeline is already running")]
    AlreadyRunning,
    #[error("pipeline is not running")]
    NotRunning,
    #[error("pipeline has not been initialized")]
    NotInitialized,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failure of a single call to the sentiment scoring capability
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("scoring request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("scoring service returned {0}: {1}")]
    Status(u16, String),
    #[error("scoring response malformed: {0}")]
    MalformedResponse(String),
    #[error("scoring rejected: {0}")]
    Rejected(String),
    #[error("scoring worker failed: {0}")]
    WorkerFailed(String),
    #[error("scoring call gate closed")]
    GateClosed,
}

/// Failure of the persistence sink
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
