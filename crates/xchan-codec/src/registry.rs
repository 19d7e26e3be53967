use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{BinaryCodec, Codec, IdentityCodec, JsonCodec, YamlCodec};
use crate::error::CodecError;

/// Identifier of a built-in codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serializer {
    /// [`BinaryCodec`].
    #[default]
    Binary,
    /// [`JsonCodec`].
    Json,
    /// [`YamlCodec`].
    Yaml,
    /// [`IdentityCodec`].
    Identity,
}

impl Serializer {
    /// Every built-in serializer.
    pub const ALL: [Serializer; 4] = [
        Serializer::Binary,
        Serializer::Json,
        Serializer::Yaml,
        Serializer::Identity,
    ];

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Serializer::Binary => "binary",
            Serializer::Json => "json",
            Serializer::Yaml => "yaml",
            Serializer::Identity => "identity",
        }
    }

    /// Construct the codec this identifier stands for.
    pub fn codec<T>(self) -> Arc<dyn Codec<T>>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        debug!(serializer = self.name(), "resolved codec");
        match self {
            Serializer::Binary => Arc::new(BinaryCodec),
            Serializer::Json => Arc::new(JsonCodec),
            Serializer::Yaml => Arc::new(YamlCodec),
            Serializer::Identity => Arc::new(IdentityCodec),
        }
    }
}

impl FromStr for Serializer {
    type Err = CodecError;

    /// Accepts canonical names plus the historical aliases `marshal`
    /// (binary) and `pure`/`plain` (identity), case-insensitively.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "binary" | "marshal" => Ok(Serializer::Binary),
            "json" => Ok(Serializer::Json),
            "yaml" | "yml" => Ok(Serializer::Yaml),
            "identity" | "pure" | "plain" => Ok(Serializer::Identity),
            _ => Err(CodecError::UnknownSerializer(name.to_string())),
        }
    }
}

impl fmt::Display for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
