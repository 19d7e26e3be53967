/// Errors that can occur while encoding or decoding values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// bincode failed to encode or decode.
    #[error("binary codec error: {0}")]
    Binary(#[from] bincode::Error),

    /// serde_json failed to encode or decode.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// serde_yaml failed to encode or decode.
    #[error("yaml codec error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The identity codec only carries values that serialize as strings.
    #[error("identity codec needs a string value, got {0}")]
    NotRaw(&'static str),

    /// The identity codec received bytes that are not UTF-8.
    #[error("identity payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// No built-in serializer has this name.
    #[error("unknown serializer: {0}")]
    UnknownSerializer(String),

    /// Failure reported by a caller-supplied codec.
    #[error("{codec} codec error: {message}")]
    Custom { codec: String, message: String },
}

impl CodecError {
    /// Build an error for a caller-supplied codec.
    pub fn custom(codec: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Custom {
            codec: codec.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
