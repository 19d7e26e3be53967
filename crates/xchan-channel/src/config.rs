use std::path::PathBuf;
use std::time::Duration;

use xchan_codec::Serializer;
use xchan_frame::LedgerConfig;
use xchan_transport::SocketKind;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Which lock guards the channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockKind {
    /// `lockf` on a temporary file; safe for any number of processes.
    #[default]
    File,
    /// No locking. Only for channels used by a single participant.
    Null,
}

/// Configuration used when creating a channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Built-in codec to use when no explicit codec is given.
    pub serializer: Serializer,
    /// Socket type of the underlying pair.
    pub socket: SocketKind,
    /// Lock implementation.
    pub lock: LockKind,
    /// Directory for the ledger and lock files. Default: `std::env::temp_dir()`.
    pub tmpdir: Option<PathBuf>,
    /// Ledger storage settings.
    pub ledger: LedgerConfig,
    /// Maximum encoded payload size in bytes. Default: 16 MiB.
    ///
    /// Socket buffers are sized to fit it; when the kernel grants less, the
    /// factory lowers the limit to what a single message can use.
    pub max_payload_size: usize,
    /// Pause between retries on lock contention. Zero yields instead.
    pub retry_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            serializer: Serializer::default(),
            socket: SocketKind::default(),
            lock: LockKind::default(),
            tmpdir: None,
            ledger: LedgerConfig::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            retry_interval: Duration::ZERO,
        }
    }
}

impl ChannelConfig {
    /// Override the serializer.
    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    /// Override the socket type.
    pub fn with_socket(mut self, socket: SocketKind) -> Self {
        self.socket = socket;
        self
    }

    /// Override the lock implementation.
    pub fn with_lock(mut self, lock: LockKind) -> Self {
        self.lock = lock;
        self
    }

    /// Store ledger and lock files in `dir`.
    pub fn with_tmpdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmpdir = Some(dir.into());
        self
    }

    /// Override the ledger storage settings.
    pub fn with_ledger(mut self, ledger: LedgerConfig) -> Self {
        self.ledger = ledger;
        self
    }

    /// Override the maximum payload size.
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    /// Override the pause between lock-contention retries.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Lower the maximum payload size to `limit` if it is currently higher.
    pub fn clamp_max_payload_size(mut self, limit: usize) -> Self {
        self.max_payload_size = self.max_payload_size.min(limit);
        self
    }

    /// Directory where shared storage is provisioned.
    pub fn storage_dir(&self) -> PathBuf {
        self.tmpdir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.serializer, Serializer::Binary);
        assert_eq!(config.socket, SocketKind::Datagram);
        assert_eq!(config.lock, LockKind::File);
        assert_eq!(config.max_payload_size, DEFAULT_MAX_PAYLOAD);
        assert_eq!(config.storage_dir(), std::env::temp_dir());
    }

    #[test]
    fn clamp_only_lowers() {
        let config = ChannelConfig::default().with_max_payload_size(1000);
        assert_eq!(config.clone().clamp_max_payload_size(10).max_payload_size, 10);
        assert_eq!(config.clamp_max_payload_size(5000).max_payload_size, 1000);
    }

    #[test]
    fn builder_overrides() {
        let config = ChannelConfig::default()
            .with_serializer(Serializer::Json)
            .with_socket(SocketKind::Stream)
            .with_lock(LockKind::Null)
            .with_tmpdir("/var/tmp")
            .with_ledger(LedgerConfig { initial_capacity: 8 })
            .with_max_payload_size(1024)
            .with_retry_interval(Duration::from_millis(1));

        assert_eq!(config.serializer, Serializer::Json);
        assert_eq!(config.socket, SocketKind::Stream);
        assert_eq!(config.lock, LockKind::Null);
        assert_eq!(config.storage_dir(), PathBuf::from("/var/tmp"));
        assert_eq!(config.ledger.initial_capacity, 8);
        assert_eq!(config.max_payload_size, 1024);
        assert_eq!(config.retry_interval, Duration::from_millis(1));
    }
}
