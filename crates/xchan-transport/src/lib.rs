//! Duplex byte transport for xchan channels.
//!
//! Provides a connected Unix socket pair whose halves are switched to
//! non-blocking mode, plus `poll(2)` based readiness waits. The handles are
//! plain file descriptors, so they survive `fork` and can be shared by every
//! process that inherits them.
//!
//! This is the lowest layer of xchan. Everything else builds on top of the
//! [`Transport`] trait provided here.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod socket;

pub use error::{Result, TransportError};
pub use traits::Transport;

#[cfg(unix)]
pub use socket::{SocketKind, SocketPair};
