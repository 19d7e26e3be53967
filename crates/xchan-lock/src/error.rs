use std::path::PathBuf;

/// Errors that can occur in lock operations.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Failed to create the backing lock file.
    #[error("failed to create lock file in {dir}: {source}")]
    Create {
        dir: PathBuf,
        source: std::io::Error,
    },

    /// The lock is held by another participant.
    #[error("lock is held by another participant")]
    WouldBlock,

    /// The lock has been closed.
    #[error("lock closed")]
    Closed,

    /// An OS-level locking call failed.
    #[error("lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LockError>;
