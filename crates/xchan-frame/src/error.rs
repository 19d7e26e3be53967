use std::path::PathBuf;

/// Errors that can occur while maintaining the frame ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Failed to create the backing file.
    #[error("failed to create ledger storage in {dir}: {source}")]
    Create {
        dir: PathBuf,
        source: std::io::Error,
    },

    /// Mapping the backing file into memory failed.
    #[error("failed to map ledger storage ({len} bytes): {source}")]
    Map { len: usize, source: std::io::Error },

    /// The shared header does not look like a ledger.
    #[error("ledger storage is corrupt: {0}")]
    Corrupt(String),

    /// The ledger cannot grow any further.
    #[error("ledger capacity overflow ({0} entries)")]
    CapacityOverflow(u64),

    /// An I/O error occurred on the backing file.
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The ledger has been closed.
    #[error("ledger closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, LedgerError>;
