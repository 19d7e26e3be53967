use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::error::{LedgerError, Result};
use crate::layout::{
    storage_size, LedgerConfig, BYTES_RECEIVED_OFFSET, BYTES_SENT_OFFSET, CAPACITY_OFFSET,
    HEADER_SIZE, HEAD_OFFSET, LEN_OFFSET, MAGIC, MAGIC_OFFSET, SLOT_SIZE,
};

/// A `MAP_SHARED` view of the ledger file.
struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain shared memory; all access goes through atomics
// and is serialized by the channel lock.
unsafe impl Send for Mapping {}

impl Mapping {
    fn new(file: &File, len: usize) -> Result<Self> {
        // SAFETY: a fresh shared mapping of an open descriptor; the kernel picks
        // the address and the result is checked against MAP_FAILED.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(LedgerError::Map {
                len,
                source: std::io::Error::last_os_error(),
            });
        }
        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or_else(|| LedgerError::Map {
            len,
            source: std::io::Error::other("mmap returned null"),
        })?;
        Ok(Self { ptr, len })
    }

    fn word(&self, offset: usize) -> &AtomicU64 {
        debug_assert!(offset + 8 <= self.len && offset % 8 == 0);
        // SAFETY: the mapping is page aligned, `offset` is a multiple of 8 within
        // bounds, and the memory lives as long as `self`.
        unsafe { &*self.ptr.as_ptr().add(offset).cast::<AtomicU64>() }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe a mapping created by `Mapping::new`
        // that has not been unmapped yet.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast::<libc::c_void>(), self.len);
        }
    }
}

/// FIFO of message byte lengths plus cumulative byte counters, stored in a
/// file mapping that every process inheriting the descriptor shares.
///
/// The ledger performs no synchronization. Callers hold the channel's
/// cross-process lock for the duration of every call, including reads.
pub struct FrameLengthLedger {
    file: File,
    map: Option<Mapping>,
}

impl FrameLengthLedger {
    /// Create an empty ledger backed by an unlinked temporary file in `dir`.
    pub fn create(dir: impl AsRef<Path>, config: &LedgerConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let capacity = config.initial_capacity.max(1);
        let size = storage_size(capacity).ok_or(LedgerError::CapacityOverflow(capacity))?;

        let file = tempfile::tempfile_in(dir).map_err(|source| LedgerError::Create {
            dir: dir.to_path_buf(),
            source,
        })?;
        file.set_len(size as u64)?;

        let map = Mapping::new(&file, size)?;
        map.word(CAPACITY_OFFSET).store(capacity, Ordering::Relaxed);
        map.word(HEAD_OFFSET).store(0, Ordering::Relaxed);
        map.word(LEN_OFFSET).store(0, Ordering::Relaxed);
        map.word(BYTES_SENT_OFFSET).store(0, Ordering::Relaxed);
        map.word(BYTES_RECEIVED_OFFSET).store(0, Ordering::Relaxed);
        map.word(MAGIC_OFFSET).store(MAGIC, Ordering::Release);

        debug!(?dir, capacity, "created frame ledger");
        Ok(Self {
            file,
            map: Some(map),
        })
    }

    /// Attach to existing ledger storage, e.g. a descriptor handed over by
    /// another process.
    pub fn from_file(file: File) -> Result<Self> {
        let file_len = usize::try_from(file.metadata()?.len())
            .map_err(|_| LedgerError::Corrupt("storage larger than address space".into()))?;
        if file_len < HEADER_SIZE {
            return Err(LedgerError::Corrupt(format!(
                "storage is {file_len} bytes, header needs {HEADER_SIZE}"
            )));
        }

        let map = Mapping::new(&file, file_len)?;
        let mut ledger = Self {
            file,
            map: Some(map),
        };
        ledger.sync_mapping()?;
        Ok(ledger)
    }

    /// Open a second, independent view of the same storage.
    pub fn try_clone(&self) -> Result<Self> {
        if self.map.is_none() {
            return Err(LedgerError::Closed);
        }
        Self::from_file(self.file.try_clone()?)
    }

    /// Append `len` at the tail and add it to `bytes_sent`.
    ///
    /// A zero length is not recorded and returns 0.
    pub fn push(&mut self, len: u64) -> Result<u64> {
        if len == 0 {
            return Ok(0);
        }
        self.sync_mapping()?;
        self.reserve_one()?;

        let map = self.mapping()?;
        let capacity = map.word(CAPACITY_OFFSET).load(Ordering::Relaxed);
        let head = map.word(HEAD_OFFSET).load(Ordering::Relaxed);
        let count = map.word(LEN_OFFSET).load(Ordering::Relaxed);

        slot(map, (head + count) % capacity).store(len, Ordering::Relaxed);
        map.word(LEN_OFFSET).store(count + 1, Ordering::Relaxed);
        map.word(BYTES_SENT_OFFSET).fetch_add(len, Ordering::Relaxed);

        trace!(len, pending = count + 1, "ledger push");
        Ok(len)
    }

    /// Put `len` back at the head, undoing a [`shift`](Self::shift) whose
    /// bytes could not be read. The matching amount is taken back out of
    /// `bytes_received`.
    pub fn unshift(&mut self, len: u64) -> Result<u64> {
        if len == 0 {
            return Ok(0);
        }
        self.sync_mapping()?;
        self.reserve_one()?;

        let map = self.mapping()?;
        let capacity = map.word(CAPACITY_OFFSET).load(Ordering::Relaxed);
        let head = map.word(HEAD_OFFSET).load(Ordering::Relaxed);
        let count = map.word(LEN_OFFSET).load(Ordering::Relaxed);

        let head = (head + capacity - 1) % capacity;
        slot(map, head).store(len, Ordering::Relaxed);
        map.word(HEAD_OFFSET).store(head, Ordering::Relaxed);
        map.word(LEN_OFFSET).store(count + 1, Ordering::Relaxed);
        let received = map.word(BYTES_RECEIVED_OFFSET).load(Ordering::Relaxed);
        map.word(BYTES_RECEIVED_OFFSET)
            .store(received.saturating_sub(len), Ordering::Relaxed);

        trace!(len, pending = count + 1, "ledger unshift");
        Ok(len)
    }

    /// Remove and return the head length, or 0 when empty. The returned
    /// length is added to `bytes_received`.
    pub fn shift(&mut self) -> Result<u64> {
        self.sync_mapping()?;

        let map = self.mapping()?;
        let count = map.word(LEN_OFFSET).load(Ordering::Relaxed);
        if count == 0 {
            return Ok(0);
        }
        let capacity = map.word(CAPACITY_OFFSET).load(Ordering::Relaxed);
        let head = map.word(HEAD_OFFSET).load(Ordering::Relaxed);

        let len = slot(map, head).load(Ordering::Relaxed);
        map.word(HEAD_OFFSET)
            .store((head + 1) % capacity, Ordering::Relaxed);
        map.word(LEN_OFFSET).store(count - 1, Ordering::Relaxed);
        map.word(BYTES_RECEIVED_OFFSET).fetch_add(len, Ordering::Relaxed);

        trace!(len, pending = count - 1, "ledger shift");
        Ok(len)
    }

    /// Number of messages recorded and not yet read.
    pub fn size(&mut self) -> Result<usize> {
        self.sync_mapping()?;
        let count = self.mapping()?.word(LEN_OFFSET).load(Ordering::Relaxed);
        usize::try_from(count).map_err(|_| LedgerError::Corrupt(format!("length {count}")))
    }

    /// Total bytes recorded by [`push`](Self::push).
    pub fn bytes_sent(&mut self) -> Result<u64> {
        self.sync_mapping()?;
        Ok(self
            .mapping()?
            .word(BYTES_SENT_OFFSET)
            .load(Ordering::Relaxed))
    }

    /// Total bytes consumed by [`shift`](Self::shift).
    pub fn bytes_received(&mut self) -> Result<u64> {
        self.sync_mapping()?;
        Ok(self
            .mapping()?
            .word(BYTES_RECEIVED_OFFSET)
            .load(Ordering::Relaxed))
    }

    /// Snapshot of the pending lengths in read order.
    pub fn pending(&mut self) -> Result<Vec<u64>> {
        self.sync_mapping()?;
        let map = self.mapping()?;
        let capacity = map.word(CAPACITY_OFFSET).load(Ordering::Relaxed);
        let head = map.word(HEAD_OFFSET).load(Ordering::Relaxed);
        let count = map.word(LEN_OFFSET).load(Ordering::Relaxed);

        Ok((0..count)
            .map(|i| slot(map, (head + i) % capacity).load(Ordering::Relaxed))
            .collect())
    }

    /// Unmap the storage and release this handle's view of it.
    pub fn close(&mut self) -> Result<()> {
        match self.map.take() {
            Some(map) => {
                drop(map);
                debug!("closed frame ledger");
                Ok(())
            }
            None => Err(LedgerError::Closed),
        }
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.map.is_none()
    }

    fn mapping(&self) -> Result<&Mapping> {
        self.map.as_ref().ok_or(LedgerError::Closed)
    }

    /// Validate the header and follow growth performed by another handle.
    fn sync_mapping(&mut self) -> Result<()> {
        let map = self.mapping()?;
        let magic = map.word(MAGIC_OFFSET).load(Ordering::Acquire);
        if magic != MAGIC {
            return Err(LedgerError::Corrupt(format!("bad magic {magic:#018x}")));
        }

        let capacity = map.word(CAPACITY_OFFSET).load(Ordering::Relaxed);
        if capacity == 0 {
            return Err(LedgerError::Corrupt("zero capacity".into()));
        }
        let count = map.word(LEN_OFFSET).load(Ordering::Relaxed);
        let head = map.word(HEAD_OFFSET).load(Ordering::Relaxed);
        if count > capacity || head >= capacity {
            return Err(LedgerError::Corrupt(format!(
                "head {head}, len {count}, capacity {capacity}"
            )));
        }

        let size = storage_size(capacity).ok_or(LedgerError::CapacityOverflow(capacity))?;
        if size != map.len {
            self.remap(size)?;
            debug!(capacity, "followed ledger growth");
        }
        Ok(())
    }

    fn remap(&mut self, size: usize) -> Result<()> {
        // Drop the old view first so both never coexist.
        self.map = None;
        self.map = Some(Mapping::new(&self.file, size)?);
        Ok(())
    }

    /// Make sure one more entry fits, doubling the ring when it is full.
    fn reserve_one(&mut self) -> Result<()> {
        let map = self.mapping()?;
        let capacity = map.word(CAPACITY_OFFSET).load(Ordering::Relaxed);
        let count = map.word(LEN_OFFSET).load(Ordering::Relaxed);
        if count < capacity {
            return Ok(());
        }

        let head = map.word(HEAD_OFFSET).load(Ordering::Relaxed);
        let entries: Vec<u64> = (0..count)
            .map(|i| slot(map, (head + i) % capacity).load(Ordering::Relaxed))
            .collect();

        let new_capacity = capacity
            .checked_mul(2)
            .ok_or(LedgerError::CapacityOverflow(capacity))?;
        let size = storage_size(new_capacity).ok_or(LedgerError::CapacityOverflow(new_capacity))?;
        self.file.set_len(size as u64)?;
        self.remap(size)?;

        let map = self.mapping()?;
        for (index, len) in (0u64..).zip(entries) {
            slot(map, index).store(len, Ordering::Relaxed);
        }
        map.word(HEAD_OFFSET).store(0, Ordering::Relaxed);
        map.word(CAPACITY_OFFSET)
            .store(new_capacity, Ordering::Relaxed);

        debug!(from = capacity, to = new_capacity, "grew frame ledger");
        Ok(())
    }
}

impl std::fmt::Debug for FrameLengthLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLengthLedger")
            .field("fd", &self.file.as_raw_fd())
            .field("mapped", &self.map.as_ref().map(|map| map.len))
            .finish()
    }
}

fn slot(map: &Mapping, index: u64) -> &AtomicU64 {
    // Index is always reduced modulo the mapped capacity by the callers.
    let index = index as usize;
    map.word(HEADER_SIZE + index * SLOT_SIZE)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn ledger_with_capacity(initial_capacity: u64) -> FrameLengthLedger {
        FrameLengthLedger::create(std::env::temp_dir(), &LedgerConfig { initial_capacity })
            .unwrap()
    }

    fn assert_accounting(ledger: &mut FrameLengthLedger) {
        let pending: u64 = ledger.pending().unwrap().iter().sum();
        let sent = ledger.bytes_sent().unwrap();
        let received = ledger.bytes_received().unwrap();
        assert_eq!(sent - received, pending);
        assert_eq!(ledger.size().unwrap(), ledger.pending().unwrap().len());
    }

    #[test]
    fn push_then_shift_is_fifo() {
        let mut ledger = ledger_with_capacity(8);
        for len in [3, 1, 4, 1, 5] {
            assert_eq!(ledger.push(len).unwrap(), len);
        }
        assert_eq!(ledger.size().unwrap(), 5);

        let shifted: Vec<u64> = (0..5).map(|_| ledger.shift().unwrap()).collect();
        assert_eq!(shifted, vec![3, 1, 4, 1, 5]);
        assert_eq!(ledger.size().unwrap(), 0);
        assert_eq!(ledger.bytes_sent().unwrap(), 14);
        assert_eq!(ledger.bytes_received().unwrap(), 14);
    }

    #[test]
    fn shift_on_empty_returns_zero() {
        let mut ledger = ledger_with_capacity(4);
        assert_eq!(ledger.shift().unwrap(), 0);
        assert_eq!(ledger.bytes_received().unwrap(), 0);
    }

    #[test]
    fn zero_lengths_are_ignored() {
        let mut ledger = ledger_with_capacity(4);
        assert_eq!(ledger.push(0).unwrap(), 0);
        assert_eq!(ledger.unshift(0).unwrap(), 0);
        assert_eq!(ledger.size().unwrap(), 0);
        assert_eq!(ledger.bytes_sent().unwrap(), 0);
    }

    #[test]
    fn unshift_restores_head_and_counters() {
        let mut ledger = ledger_with_capacity(4);
        ledger.push(10).unwrap();
        ledger.push(20).unwrap();

        let len = ledger.shift().unwrap();
        assert_eq!(len, 10);
        assert_eq!(ledger.bytes_received().unwrap(), 10);

        ledger.unshift(len).unwrap();
        assert_eq!(ledger.pending().unwrap(), vec![10, 20]);
        assert_eq!(ledger.bytes_sent().unwrap(), 30);
        assert_eq!(ledger.bytes_received().unwrap(), 0);
        assert_accounting(&mut ledger);
    }

    #[test]
    fn grows_past_initial_capacity_and_keeps_order() {
        let mut ledger = ledger_with_capacity(2);
        // Move the head so the ring wraps before growing.
        ledger.push(100).unwrap();
        ledger.shift().unwrap();

        for len in 1..=9 {
            ledger.push(len).unwrap();
        }
        assert_eq!(ledger.pending().unwrap(), (1..=9).collect::<Vec<_>>());
        assert_accounting(&mut ledger);

        ledger.unshift(42).unwrap();
        assert_eq!(ledger.shift().unwrap(), 42);
        assert_eq!(ledger.shift().unwrap(), 1);
        assert_accounting(&mut ledger);
    }

    #[test]
    fn accounting_holds_over_mixed_operations() {
        let mut ledger = ledger_with_capacity(3);
        let mut next = 1u64;
        for round in 0..40u64 {
            if round % 3 == 2 {
                let len = ledger.shift().unwrap();
                if round % 5 == 0 {
                    ledger.unshift(len).unwrap();
                }
            } else {
                ledger.push(next).unwrap();
                next += 1;
            }
            assert_accounting(&mut ledger);
        }
    }

    #[test]
    fn clone_shares_state_and_follows_growth() {
        let mut first = ledger_with_capacity(2);
        let mut second = first.try_clone().unwrap();

        first.push(7).unwrap();
        assert_eq!(second.pending().unwrap(), vec![7]);

        // Growth happens through `second`; `first` has to remap.
        for len in [8, 9, 10, 11] {
            second.push(len).unwrap();
        }
        assert_eq!(first.pending().unwrap(), vec![7, 8, 9, 10, 11]);
        assert_eq!(first.shift().unwrap(), 7);
        assert_eq!(second.size().unwrap(), 4);
        assert_eq!(second.bytes_received().unwrap(), 7);
    }

    #[test]
    fn from_file_rejects_foreign_storage() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[0u8; HEADER_SIZE + 16]).unwrap();

        let err = FrameLengthLedger::from_file(file).unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt(_)));
    }

    #[test]
    fn from_file_rejects_short_storage() {
        let file = tempfile::tempfile().unwrap();
        let err = FrameLengthLedger::from_file(file).unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt(_)));
    }

    #[test]
    fn closed_ledger_rejects_use() {
        let mut ledger = ledger_with_capacity(4);
        ledger.close().unwrap();

        assert!(ledger.is_closed());
        assert!(matches!(ledger.push(1), Err(LedgerError::Closed)));
        assert!(matches!(ledger.shift(), Err(LedgerError::Closed)));
        assert!(matches!(ledger.size(), Err(LedgerError::Closed)));
        assert!(matches!(ledger.try_clone(), Err(LedgerError::Closed)));
        assert!(matches!(ledger.close(), Err(LedgerError::Closed)));
    }
}
