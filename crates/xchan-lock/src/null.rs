use crate::error::Result;
use crate::Lock;

/// A lock that never blocks and never reports contention.
///
/// Only correct when a single participant uses the channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLock;

impl Lock for NullLock {
    fn obtain(&self) -> Result<()> {
        Ok(())
    }

    fn obtain_nonblock(&self) -> Result<()> {
        Ok(())
    }

    fn release(&self) -> Result<()> {
        Ok(())
    }

    fn is_locked(&self) -> Result<bool> {
        Ok(false)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
