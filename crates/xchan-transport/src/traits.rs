use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// A duplex byte transport shared by cooperating processes.
///
/// Reads and writes never block; a full send buffer or an empty receive
/// buffer is reported as [`TransportError::WouldBlock`](crate::TransportError::WouldBlock).
/// Callers that want to block use [`wait_readable`](Transport::wait_readable)
/// and [`wait_writable`](Transport::wait_writable) first.
pub trait Transport: Send + Sync {
    /// Write as much of `buf` as the transport accepts in one call.
    fn write_nonblock(&self, buf: &[u8]) -> Result<usize>;

    /// Read at most `max_len` bytes.
    fn read_nonblock(&self, max_len: usize) -> Result<Bytes>;

    /// Check whether unread data is queued, without consuming it.
    fn peek_nonblock(&self) -> Result<bool>;

    /// Wait until the reading half is readable. `None` waits forever.
    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool>;

    /// Wait until the writing half is writable. `None` waits forever.
    fn wait_writable(&self, timeout: Option<Duration>) -> Result<bool>;

    /// Close both halves. Fails with `Closed` when already closed.
    fn close(&mut self) -> Result<()>;

    /// True once both halves have been closed.
    fn is_closed(&self) -> bool;

    /// True when every write arrives as one unit at the reader, so a read
    /// never returns part of a write or joins two writes.
    fn preserves_boundaries(&self) -> bool;
}
