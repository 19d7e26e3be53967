//! Out-of-band framing for xchan channels.
//!
//! Messages travel over the transport without any in-band header. Instead,
//! the byte length of every queued message is recorded in a FIFO ledger that
//! lives in a memory-mapped file shared by all cooperating processes,
//! together with two running counters:
//! - total bytes sent
//! - total bytes received
//!
//! The ledger does no locking of its own. Every call must happen while the
//! channel's cross-process lock is held.

pub mod error;
pub mod layout;
#[cfg(unix)]
pub mod ledger;

pub use error::{LedgerError, Result};
pub use layout::{LedgerConfig, DEFAULT_CAPACITY, HEADER_SIZE, MAGIC};
#[cfg(unix)]
pub use ledger::FrameLengthLedger;
