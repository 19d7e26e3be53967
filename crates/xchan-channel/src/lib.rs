//! Message channels shared by a process and its descendants.
//!
//! A [`Channel`] is created once, before forking, and then used by any
//! number of processes holding copies of its descriptors. Values go through a
//! codec, travel over a single socket pair and are framed by an out-of-band
//! length ledger; a cross-process lock keeps every send and receive atomic.
//!
//! ```no_run
//! use xchan_channel::create_channel;
//! use xchan_codec::Serializer;
//!
//! let ch = create_channel::<Vec<String>>(Serializer::Binary)?;
//! ch.send(&vec!["hello".to_string()])?;
//! assert_eq!(ch.recv()?, vec!["hello".to_string()]);
//! # Ok::<(), xchan_channel::ChannelError>(())
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod factory;

pub use channel::Channel;
pub use config::{ChannelConfig, LockKind, DEFAULT_MAX_PAYLOAD};
pub use error::{ChannelError, Result};
pub use factory::{create_channel, create_channel_with_codec, create_channel_with_config};
