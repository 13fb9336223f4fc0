use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("destination error: {0}")]
    Destination(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("lock busy: {0}")]
    LockBusy(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SyncerResult<T> = Result<T, SyncerError>;
