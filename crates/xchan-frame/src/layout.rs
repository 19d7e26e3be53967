//! Shared-memory layout of the ledger.
//!
//! ```text
//! ┌────────┬──────────┬──────┬─────┬────────────┬────────────────┬──────────────────┐
//! │ magic  │ capacity │ head │ len │ bytes_sent │ bytes_received │ slots (capacity) │
//! │ u64    │ u64      │ u64  │ u64 │ u64        │ u64            │ u64 each         │
//! └────────┴──────────┴──────┴─────┴────────────┴────────────────┴──────────────────┘
//! ```
//!
//! All words are native-endian: the storage never leaves the machine.
//! The slots form a ring starting at `head`.

/// Magic word: "XCHANLDG".
pub const MAGIC: u64 = u64::from_be_bytes(*b"XCHANLDG");

pub(crate) const MAGIC_OFFSET: usize = 0;
pub(crate) const CAPACITY_OFFSET: usize = 8;
pub(crate) const HEAD_OFFSET: usize = 16;
pub(crate) const LEN_OFFSET: usize = 24;
pub(crate) const BYTES_SENT_OFFSET: usize = 32;
pub(crate) const BYTES_RECEIVED_OFFSET: usize = 40;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 48;

/// Size of one length slot.
pub const SLOT_SIZE: usize = 8;

/// Slots allocated when a ledger is created.
pub const DEFAULT_CAPACITY: u64 = 64;

/// Total storage size for a ring of `capacity` slots.
pub fn storage_size(capacity: u64) -> Option<usize> {
    usize::try_from(capacity)
        .ok()?
        .checked_mul(SLOT_SIZE)?
        .checked_add(HEADER_SIZE)
}

/// Configuration for ledger storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Slots allocated up front. The ring doubles when it fills up.
    pub initial_capacity: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_CAPACITY,
        }
    }
}
