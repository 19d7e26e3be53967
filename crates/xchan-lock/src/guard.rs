use tracing::warn;

use crate::error::Result;
use crate::Lock;

/// Holds a [`Lock`] until dropped or explicitly released.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a dyn Lock,
    held: bool,
}

impl<'a> LockGuard<'a> {
    /// Block until `lock` is obtained.
    pub fn obtain(lock: &'a dyn Lock) -> Result<Self> {
        lock.obtain()?;
        Ok(Self { lock, held: true })
    }

    /// Obtain `lock` without waiting.
    pub fn try_obtain(lock: &'a dyn Lock) -> Result<Self> {
        lock.obtain_nonblock()?;
        Ok(Self { lock, held: true })
    }

    /// Release now and report failures instead of logging them.
    pub fn release(mut self) -> Result<()> {
        self.held = false;
        self.lock.release()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.held {
            if let Err(err) = self.lock.release() {
                warn!(%err, "failed to release lock");
            }
        }
    }
}
