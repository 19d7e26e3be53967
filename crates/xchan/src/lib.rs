//! Message channels for processes that share a forked socket pair.
//!
//! Create a channel before forking and every descendant can send and receive
//! whole values over it, with blocking, non-blocking and timed variants.
//!
//! # Crate Structure
//!
//! - [`transport`]: non-blocking Unix socket pair and readiness waits
//! - [`lock`]: cross-process advisory lock
//! - [`frame`]: shared ledger of message lengths and byte counters
//! - [`codec`]: value encodings (binary, JSON, YAML, identity)
//! - [`channel`]: the channel itself and its factory
//! - [`logging`]: tracing subscriber setup (behind the `logging` feature)

pub use xchan_channel::{
    create_channel, create_channel_with_codec, create_channel_with_config, Channel, ChannelConfig,
    ChannelError, LockKind,
};
pub use xchan_codec::{Codec, Serializer};

/// Re-export transport types.
pub mod transport {
    pub use xchan_transport::*;
}

/// Re-export lock types.
pub mod lock {
    pub use xchan_lock::*;
}

/// Re-export ledger types.
pub mod frame {
    pub use xchan_frame::*;
}

/// Re-export codec types.
pub mod codec {
    pub use xchan_codec::*;
}

/// Re-export channel types.
pub mod channel {
    pub use xchan_channel::*;
}

#[cfg(feature = "logging")]
pub mod logging;
