use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixDatagram, UnixStream};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// Socket type used for the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketKind {
    /// `SOCK_DGRAM`: every write is delivered as one datagram.
    #[default]
    Datagram,
    /// `SOCK_STREAM`: a plain byte stream, writes may be accepted partially.
    Stream,
}

enum Halves {
    Datagram {
        reader: UnixDatagram,
        writer: UnixDatagram,
    },
    Stream {
        reader: UnixStream,
        writer: UnixStream,
    },
}

/// A connected, non-blocking Unix socket pair.
///
/// One half is used for writing and the other for reading, so a single pair
/// behaves like one duplex pipe that every process holding the descriptors
/// can write into and read from.
pub struct SocketPair {
    kind: SocketKind,
    halves: Option<Halves>,
}

impl SocketPair {
    /// Create a socket pair of the given kind with both halves non-blocking.
    pub fn new(kind: SocketKind) -> Result<Self> {
        let halves = match kind {
            SocketKind::Datagram => {
                let (writer, reader) = UnixDatagram::pair().map_err(TransportError::Pair)?;
                writer.set_nonblocking(true)?;
                reader.set_nonblocking(true)?;
                Halves::Datagram { reader, writer }
            }
            SocketKind::Stream => {
                let (writer, reader) = UnixStream::pair().map_err(TransportError::Pair)?;
                writer.set_nonblocking(true)?;
                reader.set_nonblocking(true)?;
                Halves::Stream { reader, writer }
            }
        };

        let pair = Self {
            kind,
            halves: Some(halves),
        };
        debug!(?kind, fds = ?pair.raw_fds(), "created socket pair");
        Ok(pair)
    }

    /// Create a socket pair whose send and receive buffers on both halves are
    /// raised to `bytes`.
    ///
    /// The kernel may grant less than requested; [`max_message_size`](Self::max_message_size)
    /// reports what a single message can actually use.
    pub fn with_buffer_size(kind: SocketKind, bytes: usize) -> Result<Self> {
        let pair = Self::new(kind)?;
        let (reader, writer) = pair.raw_fds().ok_or(TransportError::Closed)?;
        for fd in [reader, writer] {
            set_buffer_size(fd, libc::SO_SNDBUF, bytes)?;
            set_buffer_size(fd, libc::SO_RCVBUF, bytes)?;
        }
        debug!(
            ?kind,
            requested = bytes,
            granted = ?pair.max_message_size().ok(),
            "sized socket buffers"
        );
        Ok(pair)
    }

    /// Largest message the writer half accepts in one call once the
    /// pair is drained.
    ///
    /// Datagrams are limited by the send buffer minus per-datagram bookkeeping.
    /// Stream writes are split into chunks of at most half the send buffer.
    pub fn max_message_size(&self) -> Result<usize> {
        let sndbuf = get_buffer_size(self.writer_fd()?, libc::SO_SNDBUF)?;
        Ok(match self.kind {
            SocketKind::Datagram => sndbuf
                .saturating_sub(DATAGRAM_HEADROOM)
                .min(DATAGRAM_CEILING),
            SocketKind::Stream => sndbuf / 2,
        })
    }

    /// The socket type of this pair.
    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// Raw `(reader, writer)` descriptors, or `None` once closed.
    pub fn raw_fds(&self) -> Option<(RawFd, RawFd)> {
        self.halves.as_ref().map(|halves| match halves {
            Halves::Datagram { reader, writer } => (reader.as_raw_fd(), writer.as_raw_fd()),
            Halves::Stream { reader, writer } => (reader.as_raw_fd(), writer.as_raw_fd()),
        })
    }

    fn halves(&self) -> Result<&Halves> {
        self.halves.as_ref().ok_or(TransportError::Closed)
    }

    fn reader_fd(&self) -> Result<RawFd> {
        Ok(match self.halves()? {
            Halves::Datagram { reader, .. } => reader.as_raw_fd(),
            Halves::Stream { reader, .. } => reader.as_raw_fd(),
        })
    }

    fn writer_fd(&self) -> Result<RawFd> {
        Ok(match self.halves()? {
            Halves::Datagram { writer, .. } => writer.as_raw_fd(),
            Halves::Stream { writer, .. } => writer.as_raw_fd(),
        })
    }
}

impl Transport for SocketPair {
    fn write_nonblock(&self, buf: &[u8]) -> Result<usize> {
        let halves = self.halves()?;
        loop {
            let written = match halves {
                Halves::Datagram { writer, .. } => writer.send(buf),
                Halves::Stream { writer, .. } => (&*writer).write(buf),
            };
            match written {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(io_to_transport_error(err, buf.len())),
            }
        }
    }

    fn read_nonblock(&self, max_len: usize) -> Result<Bytes> {
        let halves = self.halves()?;
        let mut buf = BytesMut::zeroed(max_len);
        loop {
            let read = match halves {
                Halves::Datagram { reader, .. } => reader.recv(&mut buf),
                Halves::Stream { reader, .. } => (&*reader).read(&mut buf),
            };
            match read {
                Ok(0) if self.kind == SocketKind::Stream && max_len > 0 => {
                    return Err(TransportError::Shutdown)
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf.freeze());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(io_to_transport_error(err, max_len)),
            }
        }
    }

    fn peek_nonblock(&self) -> Result<bool> {
        let fd = self.reader_fd()?;
        let mut byte = [0u8; 1];
        loop {
            // SAFETY: `byte` is a valid writable buffer of one byte and `fd` is
            // an open socket descriptor owned by this pair.
            let rc = unsafe {
                libc::recv(
                    fd,
                    byte.as_mut_ptr().cast::<libc::c_void>(),
                    byte.len(),
                    libc::MSG_PEEK | libc::MSG_DONTWAIT,
                )
            };
            if rc >= 0 {
                if rc == 0 && self.kind == SocketKind::Stream {
                    return Err(TransportError::Shutdown);
                }
                return Ok(true);
            }
            let err = std::io::Error::last_os_error();
            match err.kind() {
                ErrorKind::Interrupted => continue,
                ErrorKind::WouldBlock => return Ok(false),
                _ => return Err(TransportError::Io(err)),
            }
        }
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.reader_fd()?, libc::POLLIN, timeout)
    }

    fn wait_writable(&self, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.writer_fd()?, libc::POLLOUT, timeout)
    }

    fn close(&mut self) -> Result<()> {
        match self.halves.take() {
            Some(halves) => {
                drop(halves);
                debug!(kind = ?self.kind, "closed socket pair");
                Ok(())
            }
            None => Err(TransportError::Closed),
        }
    }

    fn is_closed(&self) -> bool {
        self.halves.is_none()
    }

    fn preserves_boundaries(&self) -> bool {
        self.kind == SocketKind::Datagram
    }
}

impl std::fmt::Debug for SocketPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketPair")
            .field("kind", &self.kind)
            .field("fds", &self.raw_fds())
            .finish()
    }
}

/// Send-buffer bytes the kernel keeps back from each datagram.
const DATAGRAM_HEADROOM: usize = 64;

/// A datagram is built in one kernel allocation, which cannot exceed this.
const DATAGRAM_CEILING: usize = 4 << 20;

/// Privileged variants that may exceed the system-wide buffer cap.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn forced_option(option: libc::c_int) -> Option<libc::c_int> {
    match option {
        libc::SO_SNDBUF => Some(libc::SO_SNDBUFFORCE),
        libc::SO_RCVBUF => Some(libc::SO_RCVBUFFORCE),
        _ => None,
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn forced_option(_option: libc::c_int) -> Option<libc::c_int> {
    None
}

fn setsockopt_int(fd: RawFd, option: libc::c_int, value: libc::c_int) -> std::io::Result<()> {
    // SAFETY: `value` outlives the call and the length passed matches its type.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            (&value as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Raise a buffer size, trying the uncapped option first. Without
/// privileges the kernel clamps the plain option to its configured maximum.
fn set_buffer_size(fd: RawFd, option: libc::c_int, bytes: usize) -> Result<()> {
    let value = libc::c_int::try_from(bytes).unwrap_or(libc::c_int::MAX);
    if let Some(forced) = forced_option(option) {
        if setsockopt_int(fd, forced, value).is_ok() {
            return Ok(());
        }
    }
    setsockopt_int(fd, option, value).map_err(TransportError::Io)
}

fn get_buffer_size(fd: RawFd, option: libc::c_int) -> Result<usize> {
    let mut value: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `value` and `len` are valid out pointers sized for a c_int.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            (&mut value as *mut libc::c_int).cast::<libc::c_void>(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(TransportError::Io(std::io::Error::last_os_error()));
    }
    Ok(usize::try_from(value).unwrap_or(0))
}

fn io_to_transport_error(err: std::io::Error, size: usize) -> TransportError {
    if err.kind() == ErrorKind::WouldBlock {
        return TransportError::WouldBlock;
    }
    match err.raw_os_error() {
        Some(libc::ENOBUFS) => TransportError::WouldBlock,
        Some(libc::EMSGSIZE) => TransportError::MessageTooLarge { size },
        _ => TransportError::Io(err),
    }
}

/// Wait for `events` on `fd`. Hang-ups and errors count as ready so that the
/// following read or write reports them.
fn poll_fd(fd: RawFd, events: libc::c_short, timeout: Option<Duration>) -> Result<bool> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);

    loop {
        let timeout_ms = match deadline {
            None => -1,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let millis = remaining.as_nanos().div_ceil(1_000_000);
                i32::try_from(millis).unwrap_or(i32::MAX)
            }
        };

        let mut pfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };

        // SAFETY: `pfd` is a valid pollfd and the count passed is exactly one.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(TransportError::Io(err));
        }

        return Ok(rc > 0 && pfd.revents & (events | libc::POLLHUP | libc::POLLERR) != 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_preserves_message_boundaries() {
        let pair = SocketPair::new(SocketKind::Datagram).unwrap();

        assert_eq!(pair.write_nonblock(b"first").unwrap(), 5);
        assert_eq!(pair.write_nonblock(b"second").unwrap(), 6);

        assert_eq!(pair.read_nonblock(5).unwrap().as_ref(), b"first");
        assert_eq!(pair.read_nonblock(6).unwrap().as_ref(), b"second");
        assert!(pair.preserves_boundaries());
    }

    #[test]
    fn stream_roundtrip() {
        let pair = SocketPair::new(SocketKind::Stream).unwrap();

        pair.write_nonblock(b"hello").unwrap();
        let bytes = pair.read_nonblock(5).unwrap();
        assert_eq!(bytes.as_ref(), b"hello");
        assert!(!pair.preserves_boundaries());
    }

    #[test]
    fn empty_read_would_block() {
        for kind in [SocketKind::Datagram, SocketKind::Stream] {
            let pair = SocketPair::new(kind).unwrap();
            let err = pair.read_nonblock(1).unwrap_err();
            assert!(err.is_would_block(), "{kind:?}: {err}");
        }
    }

    #[test]
    fn peek_does_not_consume() {
        let pair = SocketPair::new(SocketKind::Stream).unwrap();
        assert!(!pair.peek_nonblock().unwrap());

        pair.write_nonblock(b"x").unwrap();
        assert!(pair.peek_nonblock().unwrap());
        assert!(pair.peek_nonblock().unwrap());
        assert_eq!(pair.read_nonblock(1).unwrap().as_ref(), b"x");
        assert!(!pair.peek_nonblock().unwrap());
    }

    #[test]
    fn wait_readable_times_out_on_empty_pair() {
        let pair = SocketPair::new(SocketKind::Datagram).unwrap();
        let start = Instant::now();
        let ready = pair
            .wait_readable(Some(Duration::from_millis(50)))
            .unwrap();
        assert!(!ready);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn wait_readable_after_write() {
        let pair = SocketPair::new(SocketKind::Datagram).unwrap();
        pair.write_nonblock(b"ready").unwrap();
        assert!(pair.wait_readable(Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn fresh_pair_is_writable() {
        let pair = SocketPair::new(SocketKind::Stream).unwrap();
        assert!(pair.wait_writable(Some(Duration::ZERO)).unwrap());
    }

    #[test]
    fn full_stream_buffer_would_block() {
        let pair = SocketPair::new(SocketKind::Stream).unwrap();
        let chunk = vec![0u8; 64 * 1024];
        let mut total = 0usize;
        let err = loop {
            match pair.write_nonblock(&chunk) {
                Ok(n) => total += n,
                Err(err) => break err,
            }
            assert!(total < 64 * 1024 * 1024, "socket buffer never filled");
        };
        assert!(err.is_would_block());

        // Draining makes room again.
        pair.read_nonblock(total).unwrap();
        assert!(pair.wait_writable(Some(Duration::from_secs(1))).unwrap());
    }

    #[test]
    fn oversized_datagram_rejected() {
        let pair = SocketPair::new(SocketKind::Datagram).unwrap();
        let payload = vec![0u8; 8 * 1024 * 1024];
        let err = pair.write_nonblock(&payload).unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { size } if size == payload.len()));
    }

    #[test]
    fn raised_buffers_carry_larger_datagrams() {
        let small = SocketPair::new(SocketKind::Datagram).unwrap();
        let large = SocketPair::with_buffer_size(SocketKind::Datagram, 1 << 20).unwrap();
        let max = large.max_message_size().unwrap();
        assert!(max >= small.max_message_size().unwrap());
        assert!(max >= 256 * 1024, "granted only {max} bytes");

        let payload = vec![7u8; max.min(1 << 20)];
        assert_eq!(large.write_nonblock(&payload).unwrap(), payload.len());
        assert_eq!(large.read_nonblock(payload.len()).unwrap().as_ref(), &payload[..]);
    }

    #[test]
    fn stream_limit_is_half_the_send_buffer() {
        let pair = SocketPair::with_buffer_size(SocketKind::Stream, 64 * 1024).unwrap();
        let max = pair.max_message_size().unwrap();
        assert!(max > 0);

        let payload = vec![1u8; max];
        assert_eq!(pair.write_nonblock(&payload).unwrap(), max);
        assert_eq!(pair.read_nonblock(max).unwrap().len(), max);
    }

    #[test]
    fn close_twice_fails() {
        let mut pair = SocketPair::new(SocketKind::Datagram).unwrap();
        assert!(!pair.is_closed());

        pair.close().unwrap();
        assert!(pair.is_closed());
        assert!(pair.raw_fds().is_none());
        assert!(matches!(pair.close(), Err(TransportError::Closed)));
        assert!(matches!(
            pair.write_nonblock(b"late"),
            Err(TransportError::Closed)
        ));
        assert!(matches!(pair.read_nonblock(1), Err(TransportError::Closed)));
    }
}
