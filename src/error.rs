use crate::models::TaskId;
use thiserror::Error;

/// Ошибки хранилища (Persistence Gateway)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json column: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store mutex poisoned: {0}")]
    Poisoned(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("task {0} not found in store")]
    MissingRow(TaskId),
}

/// Errors surfaced by public engine operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("no authenticated user")]
    NoActiveUser,
    #[error("engine driver is closed")]
    Closed,
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Persistence(e.to_string())
    }
}
