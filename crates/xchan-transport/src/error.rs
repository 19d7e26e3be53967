/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to create the connected socket pair.
    #[error("failed to create socket pair: {0}")]
    Pair(std::io::Error),

    /// The operation could not complete without blocking.
    ///
    /// Transient buffer exhaustion (`ENOBUFS`) is reported the same way.
    #[error("transport operation would block")]
    WouldBlock,

    /// The message does not fit into a single transport write.
    #[error("message too large for transport ({size} bytes)")]
    MessageTooLarge { size: usize },

    /// An I/O error occurred on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every writer went away; the stream reached end of file.
    #[error("transport shut down")]
    Shutdown,

    /// The transport has been closed by this process.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Returns true when the operation may succeed if retried later.
    pub fn is_would_block(&self) -> bool {
        matches!(self, TransportError::WouldBlock)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
