use thiserror::Error;

/// Error kinds surfaced by the locking and recovery layers. Precondition
/// checks run before any state mutation, so an `Err` means nothing was
/// acquired, released, promoted, or logged.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("duplicate lock request: {0}")]
    DuplicateLockRequest(String),

    #[error("no lock held: {0}")]
    NoLockHeld(String),

    #[error("invalid lock request: {0}")]
    InvalidLock(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("unknown savepoint: {0}")]
    UnknownSavepoint(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupt log: {0}")]
    CorruptLog(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;
