use std::fs::File;
use std::io::ErrorKind;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{LockError, Result};
use crate::Lock;

/// A `lockf(3)` lock on an unlinked temporary file.
///
/// POSIX record locks belong to a process, so every process that inherits the
/// descriptor (for example through `fork`) competes for the same lock. Threads
/// of one process would all count as the holder, so an in-process gate is
/// taken before the record lock. The gate remembers the holder's pid and
/// thread: a child forked while its parent holds the lock does not inherit the
/// hold, and [`Lock::is_locked`] reports false to the holding thread itself.
///
/// The lock is dropped by the kernel when its holder exits or closes the file.
pub struct FileLock {
    file: Option<File>,
    gate: Mutex<Option<Holder>>,
    gate_opened: Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Holder {
    pid: u32,
    thread: ThreadId,
}

impl Holder {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            thread: std::thread::current().id(),
        }
    }
}

impl FileLock {
    /// Create a lock backed by a temporary file in the system temp directory.
    pub fn new() -> Result<Self> {
        Self::new_in(std::env::temp_dir())
    }

    /// Create a lock backed by a temporary file in `dir`.
    ///
    /// The file is unlinked immediately; only inherited descriptors reach it.
    pub fn new_in(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let file = tempfile::tempfile_in(dir).map_err(|source| LockError::Create {
            dir: dir.to_path_buf(),
            source,
        })?;
        debug!(?dir, fd = file.as_raw_fd(), "created lock file");

        Ok(Self {
            file: Some(file),
            gate: Mutex::new(None),
            gate_opened: Condvar::new(),
        })
    }

    fn fd(&self) -> Result<RawFd> {
        self.file
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or(LockError::Closed)
    }

    fn open_gate(&self) {
        *self.gate.lock() = None;
        self.gate_opened.notify_one();
    }

    fn gate_held(holder: &Option<Holder>) -> bool {
        holder.is_some_and(|h| h.pid == std::process::id())
    }
}

impl Lock for FileLock {
    fn obtain(&self) -> Result<()> {
        let fd = self.fd()?;
        {
            let mut holder = self.gate.lock();
            while Self::gate_held(&holder) {
                self.gate_opened.wait(&mut holder);
            }
            *holder = Some(Holder::current());
        }

        if let Err(err) = lockf(fd, libc::F_LOCK) {
            self.open_gate();
            return Err(LockError::Io(err));
        }
        Ok(())
    }

    fn obtain_nonblock(&self) -> Result<()> {
        let fd = self.fd()?;
        {
            let mut holder = self.gate.lock();
            if Self::gate_held(&holder) {
                return Err(LockError::WouldBlock);
            }
            *holder = Some(Holder::current());
        }

        match lockf(fd, libc::F_TLOCK) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.open_gate();
                if is_contended(&err) {
                    Err(LockError::WouldBlock)
                } else {
                    Err(LockError::Io(err))
                }
            }
        }
    }

    fn release(&self) -> Result<()> {
        let fd = self.fd()?;
        let result = lockf(fd, libc::F_ULOCK);
        self.open_gate();
        result.map_err(LockError::Io)
    }

    fn is_locked(&self) -> Result<bool> {
        let fd = self.fd()?;
        if let Some(holder) = *self.gate.lock() {
            if holder.pid == std::process::id() {
                return Ok(holder.thread != std::thread::current().id());
            }
        }

        match lockf(fd, libc::F_TEST) {
            Ok(()) => Ok(false),
            Err(err) if is_contended(&err) => Ok(true),
            Err(err) => Err(LockError::Io(err)),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => {
                drop(file);
                self.open_gate();
                debug!("closed lock file");
                Ok(())
            }
            None => Err(LockError::Closed),
        }
    }
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("fd", &self.file.as_ref().map(AsRawFd::as_raw_fd))
            .finish()
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EACCES) | Some(libc::EAGAIN))
}

fn lockf(fd: RawFd, cmd: libc::c_int) -> std::io::Result<()> {
    loop {
        // SAFETY: `fd` is an open descriptor owned by the lock; `lockf` does not
        // retain any pointer.
        let rc = unsafe { libc::lockf(fd, cmd, 0) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn obtain_and_release() {
        let lock = FileLock::new().unwrap();
        assert!(!lock.is_locked().unwrap());

        lock.obtain().unwrap();
        lock.release().unwrap();
        lock.obtain_nonblock().unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn holder_does_not_see_itself_as_contended() {
        let lock = Arc::new(FileLock::new().unwrap());
        lock.obtain().unwrap();
        assert!(!lock.is_locked().unwrap());

        let observer = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || lock.is_locked().unwrap())
        };
        assert!(observer.join().unwrap());

        lock.release().unwrap();
        assert!(!lock.is_locked().unwrap());
    }

    #[test]
    fn nonblock_fails_while_another_thread_holds() {
        let lock = Arc::new(FileLock::new().unwrap());
        lock.obtain().unwrap();

        let contender = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                let err = lock.obtain_nonblock().unwrap_err();
                assert!(matches!(err, LockError::WouldBlock));
                assert!(lock.is_locked().unwrap());
            })
        };
        contender.join().unwrap();

        lock.release().unwrap();
        lock.obtain_nonblock().unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn obtain_waits_for_release() {
        let lock = Arc::new(FileLock::new().unwrap());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        lock.obtain().unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_micros(50));
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.release().unwrap();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_in_missing_dir_fails() {
        let result = FileLock::new_in("/nonexistent/xchan-lock-dir");
        assert!(matches!(result, Err(LockError::Create { .. })));
    }

    #[test]
    fn closed_lock_rejects_use() {
        let mut lock = FileLock::new().unwrap();
        lock.close().unwrap();

        assert!(matches!(lock.obtain(), Err(LockError::Closed)));
        assert!(matches!(lock.obtain_nonblock(), Err(LockError::Closed)));
        assert!(matches!(lock.is_locked(), Err(LockError::Closed)));
        assert!(matches!(lock.close(), Err(LockError::Closed)));
    }
}
