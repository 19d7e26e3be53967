//! Advisory mutual exclusion shared by unrelated processes.
//!
//! A channel's framing only stays intact if "record length + write bytes" and
//! "pop length + read bytes" never interleave between participants. The
//! [`Lock`] trait is the one primitive that guarantees this:
//!
//! - [`FileLock`]: `lockf(3)` on an unlinked temporary file, inherited over `fork`
//! - [`NullLock`]: no-op, for channels with a single participant
//! - [`LockGuard`]: RAII helper that releases on every exit path

pub mod error;
#[cfg(unix)]
pub mod file;
pub mod guard;
pub mod null;

pub use error::{LockError, Result};
#[cfg(unix)]
pub use file::FileLock;
pub use guard::LockGuard;
pub use null::NullLock;

/// A mutual-exclusion primitive visible to every process sharing its handle.
///
/// Not re-entrant: a holder must release before obtaining again.
pub trait Lock: Send + Sync {
    /// Block until the lock is free, then take it.
    fn obtain(&self) -> Result<()>;

    /// Take the lock if it is free, otherwise fail with [`LockError::WouldBlock`].
    fn obtain_nonblock(&self) -> Result<()>;

    /// Give the lock back. Must be paired with a successful obtain.
    fn release(&self) -> Result<()>;

    /// True when another participant currently holds the lock.
    fn is_locked(&self) -> Result<bool>;

    /// Release the resources backing the lock.
    fn close(&mut self) -> Result<()>;
}
