//! Value codecs for xchan channels.
//!
//! A channel moves bytes; a [`Codec`] turns application values into those
//! bytes and back. Four codecs are built in and selected by [`Serializer`]:
//! - `binary`: compact bincode encoding (the default)
//! - `json`: serde_json text
//! - `yaml`: serde_yaml text
//! - `identity`: string values passed through as raw UTF-8
//!
//! Anything else implementing [`Codec`] can be handed to a channel directly.

pub mod codec;
pub mod error;
pub mod registry;

pub use codec::{BinaryCodec, Codec, IdentityCodec, JsonCodec, YamlCodec};
pub use error::{CodecError, Result};
pub use registry::Serializer;
