use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use xchan_codec::Codec;
use xchan_frame::{FrameLengthLedger, LedgerError};
use xchan_lock::{Lock, LockGuard};
use xchan_transport::{Transport, TransportError};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};

/// Upper bound on one writability wait between send attempts.
const WRITABLE_POLL: Duration = Duration::from_millis(10);

/// A FIFO message queue over one duplex transport.
///
/// Every handle to the transport, the ledger storage and the lock is
/// inherited by forked children, so a channel created before forking can be
/// used from any number of processes. Threads of one process share a channel
/// by reference.
///
/// Each send holds the lock while it writes the payload and records its
/// length; each receive holds it while it pops a length and reads exactly
/// that many bytes. No in-band framing is used.
pub struct Channel<T> {
    codec: Arc<dyn Codec<T>>,
    transport: Box<dyn Transport>,
    ledger: Mutex<FrameLengthLedger>,
    lock: Box<dyn Lock>,
    max_payload_size: usize,
    retry_interval: Duration,
}

impl<T> Channel<T> {
    /// Assemble a channel from already provisioned parts.
    ///
    /// Every process that will use the channel must hold handles to the same
    /// transport, ledger storage and lock.
    pub fn from_parts(
        codec: Arc<dyn Codec<T>>,
        transport: Box<dyn Transport>,
        ledger: FrameLengthLedger,
        lock: Box<dyn Lock>,
        config: &ChannelConfig,
    ) -> Self {
        Self {
            codec,
            transport,
            ledger: Mutex::new(ledger),
            lock,
            max_payload_size: config.max_payload_size,
            retry_interval: config.retry_interval,
        }
    }

    /// Largest encoded payload this channel accepts.
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Name of the codec values go through.
    pub fn codec_name(&self) -> &str {
        self.codec.name()
    }

    /// Send `value`, waiting for lock and buffer space as long as needed.
    ///
    /// Returns the number of bytes recorded for the message.
    pub fn send(&self, value: &T) -> Result<usize> {
        let payload = self.encode(value)?;
        loop {
            match self.send_payload_nonblock(&payload) {
                Err(ChannelError::WaitWritable) => {
                    self.wait_writable(Some(WRITABLE_POLL))?;
                }
                Err(ChannelError::WaitLockable) => self.backoff(),
                other => return other,
            }
        }
    }

    /// Send `value` without waiting.
    ///
    /// Fails with [`ChannelError::WaitLockable`] when another participant
    /// holds the lock and with [`ChannelError::WaitWritable`] when the
    /// transport cannot take the message right now. Nothing is recorded in
    /// either case.
    pub fn send_nonblock(&self, value: &T) -> Result<usize> {
        let payload = self.encode(value)?;
        self.send_payload_nonblock(&payload)
    }

    /// Send `value`, giving up after `timeout`.
    ///
    /// Returns `Ok(None)` when the deadline passes before the message could
    /// be written.
    pub fn timed_send(&self, value: &T, timeout: Duration) -> Result<Option<usize>> {
        let payload = self.encode(value)?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.send_payload_nonblock(&payload) {
                Err(err) if err.is_retryable() => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        trace!(?timeout, "timed send expired");
                        return Ok(None);
                    }
                    if matches!(err, ChannelError::WaitLockable) {
                        self.backoff();
                    } else {
                        self.wait_writable(Some(remaining.min(WRITABLE_POLL)))?;
                    }
                }
                other => return other.map(Some),
            }
        }
    }

    /// Receive the oldest message, waiting as long as needed.
    pub fn recv(&self) -> Result<T> {
        loop {
            match self.recv_nonblock() {
                Err(ChannelError::WaitReadable) => {
                    self.wait_readable(None)?;
                }
                Err(ChannelError::WaitLockable) => self.backoff(),
                other => return other,
            }
        }
    }

    /// Receive the oldest message without waiting.
    ///
    /// Fails with [`ChannelError::WaitLockable`] on lock contention and with
    /// [`ChannelError::WaitReadable`] when no message is queued. A message
    /// whose bytes cannot be read yet stays queued.
    pub fn recv_nonblock(&self) -> Result<T> {
        let guard = self.try_enter()?;
        let payload = {
            let mut ledger = self.ledger.lock();
            self.read_frame(&mut ledger)?
        };
        guard.release()?;
        Ok(self.codec.load(&payload)?)
    }

    /// Receive the oldest message, giving up after `timeout`.
    ///
    /// Returns `Ok(None)` when no message could be read before the deadline.
    pub fn timed_recv(&self, timeout: Duration) -> Result<Option<T>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.wait_readable(Some(remaining))? {
                trace!(?timeout, "timed recv expired");
                return Ok(None);
            }
            match self.recv_nonblock() {
                Err(err) if err.is_retryable() => {
                    if Instant::now() >= deadline {
                        trace!(?timeout, "timed recv expired");
                        return Ok(None);
                    }
                    if matches!(err, ChannelError::WaitLockable) {
                        self.backoff();
                    }
                }
                other => return other.map(Some),
            }
        }
    }

    /// Receive every queued message under a single lock hold, oldest first.
    pub fn drain(&self) -> Result<Vec<T>> {
        let guard = self.enter()?;
        let mut payloads = Vec::new();
        {
            let mut ledger = self.ledger.lock();
            while ledger.size()? > 0 {
                match self.read_frame(&mut ledger) {
                    Ok(payload) => payloads.push(payload),
                    Err(ChannelError::WaitReadable) => break,
                    Err(err) => return Err(err),
                }
            }
        }
        guard.release()?;

        debug!(count = payloads.len(), "drained channel");
        payloads
            .iter()
            .map(|payload| self.codec.load(payload).map_err(ChannelError::from))
            .collect()
    }

    /// Number of messages sent and not yet received.
    pub fn size(&self) -> Result<usize> {
        self.with_ledger(FrameLengthLedger::size)
    }

    /// True when every byte sent has been received, or the channel is closed.
    pub fn is_empty(&self) -> Result<bool> {
        if self.is_closed() {
            return Ok(true);
        }
        self.with_ledger(|ledger| Ok(ledger.bytes_sent()? == ledger.bytes_received()?))
    }

    /// True when data is waiting and no other participant holds the lock.
    ///
    /// Never blocks.
    pub fn is_readable(&self) -> Result<bool> {
        if self.is_closed() || self.lock.is_locked()? {
            return Ok(false);
        }
        self.wait_readable(Some(Duration::ZERO))
    }

    /// Total payload bytes recorded by all senders.
    pub fn bytes_sent(&self) -> Result<u64> {
        self.with_ledger(FrameLengthLedger::bytes_sent)
    }

    /// Total payload bytes consumed by all receivers.
    pub fn bytes_received(&self) -> Result<u64> {
        self.with_ledger(FrameLengthLedger::bytes_received)
    }

    /// Wait until the transport has data to read. `None` waits forever.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        self.transport
            .wait_readable(timeout)
            .map_err(|err| ChannelError::from_transport(err, ChannelError::WaitReadable))
    }

    /// Wait until the transport can accept data. `None` waits forever.
    pub fn wait_writable(&self, timeout: Option<Duration>) -> Result<bool> {
        self.transport
            .wait_writable(timeout)
            .map_err(|err| ChannelError::from_transport(err, ChannelError::WaitWritable))
    }

    /// Close this process's handles to the transport, ledger and lock.
    ///
    /// Fails with [`ChannelError::AlreadyClosed`] on a closed channel. The
    /// lock is held while resources are released and is always given back;
    /// the first failure is reported.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Err(ChannelError::AlreadyClosed);
        }

        let guard = LockGuard::obtain(self.lock.as_ref())?;
        let transport = self
            .transport
            .close()
            .map_err(|err| ChannelError::from_transport(err, ChannelError::WaitWritable));
        let ledger = self.ledger.get_mut().close().map_err(ChannelError::from);
        let released = guard.release().map_err(ChannelError::from);
        let lock = self.lock.close().map_err(ChannelError::from);

        debug!(codec = self.codec.name(), "closed channel");
        transport.and(ledger).and(released).and(lock)
    }

    /// True once [`close`](Self::close) has run in this process.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        let payload = self.codec.dump(value)?;
        if payload.is_empty() {
            return Err(ChannelError::EmptyPayload);
        }
        if payload.len() > self.max_payload_size {
            return Err(ChannelError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }
        Ok(payload)
    }

    fn send_payload_nonblock(&self, payload: &[u8]) -> Result<usize> {
        let guard = self.try_enter()?;
        let written = {
            let mut ledger = self.ledger.lock();
            let written = self
                .transport
                .write_nonblock(payload)
                .map_err(|err| ChannelError::from_transport(err, ChannelError::WaitWritable))?;
            if written < payload.len() {
                warn!(written, len = payload.len(), "short write, recording accepted length");
            }
            ledger.push(written as u64)?;
            written
        };
        guard.release()?;
        trace!(len = written, "sent frame");
        Ok(written)
    }

    /// Pop one length and read that many bytes. A length whose bytes are
    /// not available yet is put back.
    fn read_frame(&self, ledger: &mut FrameLengthLedger) -> Result<Bytes> {
        let len = ledger.shift()?;
        if len == 0 {
            let queued = self
                .transport
                .peek_nonblock()
                .map_err(|err| ChannelError::from_transport(err, ChannelError::WaitReadable))?;
            return Err(if queued {
                ChannelError::Unframed
            } else {
                ChannelError::WaitReadable
            });
        }

        let expected = usize::try_from(len)
            .map_err(|_| ChannelError::Ledger(LedgerError::Corrupt(format!("frame length {len}"))))?;
        match self.read_payload(expected) {
            Ok(payload) => {
                trace!(len, "received frame");
                Ok(payload)
            }
            Err(ChannelError::WaitReadable) => {
                ledger.unshift(len)?;
                Err(ChannelError::WaitReadable)
            }
            Err(err) => Err(err),
        }
    }

    /// Read exactly `len` bytes. Only the first read may report
    /// `WaitReadable`; once bytes are consumed the rest is waited for.
    fn read_payload(&self, len: usize) -> Result<Bytes> {
        let first = self
            .transport
            .read_nonblock(len)
            .map_err(|err| ChannelError::from_transport(err, ChannelError::WaitReadable))?;
        if first.len() == len {
            return Ok(first);
        }
        if self.transport.preserves_boundaries() {
            return Err(ChannelError::FrameMismatch {
                expected: len as u64,
                actual: first.len(),
            });
        }

        let mut payload = BytesMut::with_capacity(len);
        payload.extend_from_slice(&first);
        while payload.len() < len {
            self.wait_readable(None)?;
            match self.transport.read_nonblock(len - payload.len()) {
                Ok(chunk) => payload.extend_from_slice(&chunk),
                Err(TransportError::WouldBlock) => continue,
                Err(err) => return Err(ChannelError::from_transport(err, ChannelError::Unframed)),
            }
        }
        Ok(payload.freeze())
    }

    fn try_enter(&self) -> Result<LockGuard<'_>> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        Ok(LockGuard::try_obtain(self.lock.as_ref())?)
    }

    fn enter(&self) -> Result<LockGuard<'_>> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        Ok(LockGuard::obtain(self.lock.as_ref())?)
    }

    fn with_ledger<R>(
        &self,
        read: impl FnOnce(&mut FrameLengthLedger) -> xchan_frame::Result<R>,
    ) -> Result<R> {
        let guard = self.enter()?;
        let value = {
            let mut ledger = self.ledger.lock();
            read(&mut *ledger)?
        };
        guard.release()?;
        Ok(value)
    }

    fn backoff(&self) {
        if self.retry_interval.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.retry_interval);
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("codec", &self.codec.name())
            .field("closed", &self.is_closed())
            .field("max_payload_size", &self.max_payload_size)
            .finish()
    }
}
