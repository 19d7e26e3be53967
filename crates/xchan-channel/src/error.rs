use xchan_codec::CodecError;
use xchan_frame::LedgerError;
use xchan_lock::LockError;
use xchan_transport::TransportError;

/// Errors surfaced by channel operations.
///
/// `WaitReadable`, `WaitWritable` and `WaitLockable` are the recoverable
/// outcomes of the non-blocking calls; the blocking calls retry on them.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel was closed by this process.
    #[error("closed channel")]
    Closed,

    /// `close` was called on a closed channel.
    #[error("channel already closed")]
    AlreadyClosed,

    /// No complete message is ready to be read.
    #[error("channel not readable")]
    WaitReadable,

    /// The transport cannot accept a message right now.
    #[error("channel not writable")]
    WaitWritable,

    /// Another participant holds the channel lock.
    #[error("channel locked by another participant")]
    WaitLockable,

    /// The codec produced no bytes; a zero length cannot be framed.
    #[error("empty payload cannot be framed")]
    EmptyPayload,

    /// The payload exceeds the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The transport refused a message of this size.
    #[error("transport rejected {size}-byte message")]
    MessageTooLarge { size: usize },

    /// Bytes are queued on the transport that no ledger entry accounts for.
    #[error("unframed data on transport")]
    Unframed,

    /// A read returned a different amount than the ledger recorded.
    #[error("frame length mismatch (expected {expected} bytes, read {actual})")]
    FrameMismatch { expected: u64, actual: usize },

    /// Encoding or decoding a value failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Unrecoverable transport failure.
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    /// Unrecoverable lock failure.
    #[error("lock error: {0}")]
    Lock(#[source] LockError),

    /// Unrecoverable ledger failure.
    #[error("ledger error: {0}")]
    Ledger(#[source] LedgerError),
}

impl ChannelError {
    /// True for the outcomes a caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::WaitReadable | ChannelError::WaitWritable | ChannelError::WaitLockable
        )
    }

    /// Translate a transport error; `would_block` is the outcome to report
    /// for a would-block condition in the current direction.
    pub(crate) fn from_transport(err: TransportError, would_block: ChannelError) -> Self {
        match err {
            TransportError::WouldBlock => would_block,
            TransportError::Closed => ChannelError::Closed,
            TransportError::MessageTooLarge { size } => ChannelError::MessageTooLarge { size },
            other => ChannelError::Transport(other),
        }
    }
}

impl From<LockError> for ChannelError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::WouldBlock => ChannelError::WaitLockable,
            LockError::Closed => ChannelError::Closed,
            other => ChannelError::Lock(other),
        }
    }
}

impl From<LedgerError> for ChannelError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Closed => ChannelError::Closed,
            other => ChannelError::Ledger(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_outcomes() {
        assert!(ChannelError::WaitReadable.is_retryable());
        assert!(ChannelError::WaitWritable.is_retryable());
        assert!(ChannelError::WaitLockable.is_retryable());
        assert!(!ChannelError::Closed.is_retryable());
        assert!(!ChannelError::Unframed.is_retryable());
    }

    #[test]
    fn lock_contention_maps_to_wait_lockable() {
        let err: ChannelError = LockError::WouldBlock.into();
        assert!(matches!(err, ChannelError::WaitLockable));
        let err: ChannelError = LockError::Closed.into();
        assert!(matches!(err, ChannelError::Closed));
    }

    #[test]
    fn transport_would_block_follows_direction() {
        let err = ChannelError::from_transport(TransportError::WouldBlock, ChannelError::WaitReadable);
        assert!(matches!(err, ChannelError::WaitReadable));
        let err = ChannelError::from_transport(TransportError::WouldBlock, ChannelError::WaitWritable);
        assert!(matches!(err, ChannelError::WaitWritable));
        let err = ChannelError::from_transport(
            TransportError::MessageTooLarge { size: 9 },
            ChannelError::WaitWritable,
        );
        assert!(matches!(err, ChannelError::MessageTooLarge { size: 9 }));
    }

    #[test]
    fn fatal_errors_pass_through() {
        let err: ChannelError = LedgerError::Corrupt("bad magic".into()).into();
        assert!(matches!(err, ChannelError::Ledger(LedgerError::Corrupt(_))));
        let err = ChannelError::from_transport(TransportError::Shutdown, ChannelError::WaitReadable);
        assert!(matches!(err, ChannelError::Transport(TransportError::Shutdown)));
    }

    #[test]
    fn fatal_errors_keep_their_cause() {
        use std::error::Error as _;

        let err = ChannelError::from_transport(TransportError::Shutdown, ChannelError::WaitWritable);
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), TransportError::Shutdown.to_string());

        let denied = std::io::Error::from_raw_os_error(libc::EBADF);
        let err: ChannelError = LockError::Io(denied).into();
        let cause = err.source().unwrap();
        assert!(cause.downcast_ref::<LockError>().is_some());
        assert!(cause.source().unwrap().downcast_ref::<std::io::Error>().is_some());

        let err: ChannelError = LedgerError::Corrupt("bad magic".into()).into();
        assert!(err.source().unwrap().downcast_ref::<LedgerError>().is_some());
        assert!(ChannelError::WaitReadable.source().is_none());
    }
}
