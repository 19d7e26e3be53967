use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use xchan_codec::{Codec, Serializer};
use xchan_frame::FrameLengthLedger;
use xchan_lock::{FileLock, Lock, NullLock};
use xchan_transport::{SocketPair, TransportError};

use crate::channel::Channel;
use crate::config::{ChannelConfig, LockKind};
use crate::error::{ChannelError, Result};

/// Create a channel using a built-in codec and default settings.
///
/// Call this before forking; children inherit every handle the channel needs.
pub fn create_channel<T>(serializer: Serializer) -> Result<Channel<T>>
where
    T: Serialize + DeserializeOwned + 'static,
{
    create_channel_with_config(ChannelConfig::default().with_serializer(serializer))
}

/// Create a channel from a full configuration.
pub fn create_channel_with_config<T>(config: ChannelConfig) -> Result<Channel<T>>
where
    T: Serialize + DeserializeOwned + 'static,
{
    let codec = config.serializer.codec::<T>();
    create_channel_with_codec(codec, config)
}

/// Create a channel that encodes values with a caller-supplied codec.
///
/// `config.serializer` is ignored.
pub fn create_channel_with_codec<T>(
    codec: Arc<dyn Codec<T>>,
    config: ChannelConfig,
) -> Result<Channel<T>> {
    let dir = config.storage_dir();

    let transport =
        SocketPair::with_buffer_size(config.socket, config.max_payload_size).map_err(fatal)?;
    let granted = transport.max_message_size().map_err(fatal)?;
    if granted < config.max_payload_size {
        debug!(
            requested = config.max_payload_size,
            granted, "clamped max payload size to socket buffer"
        );
    }
    let config = config.clamp_max_payload_size(granted);

    let ledger = FrameLengthLedger::create(&dir, &config.ledger)?;
    let lock: Box<dyn Lock> = match config.lock {
        LockKind::File => Box::new(FileLock::new_in(&dir)?),
        LockKind::Null => Box::new(NullLock),
    };

    debug!(
        codec = codec.name(),
        socket = ?config.socket,
        lock = ?config.lock,
        ?dir,
        "created channel"
    );
    Ok(Channel::from_parts(
        codec,
        Box::new(transport),
        ledger,
        lock,
        &config,
    ))
}

fn fatal(err: TransportError) -> ChannelError {
    match err {
        TransportError::Closed => ChannelError::Closed,
        other => ChannelError::Transport(other),
    }
}
