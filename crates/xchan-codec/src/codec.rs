use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CodecError, Result};

/// Converts values of type `T` to bytes and back.
///
/// Codecs are shared by every handle of a channel, so they must be
/// `Send + Sync` and must not keep per-message state.
pub trait Codec<T>: Send + Sync {
    /// Short name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Encode `value` into a self-contained payload.
    fn dump(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode a payload produced by [`dump`](Codec::dump).
    fn load(&self, bytes: &[u8]) -> Result<T>;
}

/// bincode encoding of any serde type.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

impl<T> Codec<T> for BinaryCodec
where
    T: Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        "binary"
    }

    fn dump(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn load(&self, bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// JSON text via serde_json.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        "json"
    }

    fn dump(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn load(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// YAML text via serde_yaml.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlCodec;

impl<T> Codec<T> for YamlCodec
where
    T: Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        "yaml"
    }

    fn dump(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(value)?.into_bytes())
    }

    fn load(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_yaml::from_slice(bytes)?)
    }
}

/// Passes string values through untouched.
///
/// The payload is exactly the UTF-8 bytes of the string. Values that do not
/// serialize as a plain string are rejected with [`CodecError::NotRaw`].
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCodec;

impl<T> Codec<T> for IdentityCodec
where
    T: Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        "identity"
    }

    fn dump(&self, value: &T) -> Result<Vec<u8>> {
        match serde_json::to_value(value)? {
            Value::String(text) => Ok(text.into_bytes()),
            other => Err(CodecError::NotRaw(value_kind(&other))),
        }
    }

    fn load(&self, bytes: &[u8]) -> Result<T> {
        let text = std::str::from_utf8(bytes)?;
        Ok(serde_json::from_value(Value::String(text.to_owned()))?)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Job {
        id: u32,
        name: String,
        tags: Vec<String>,
        meta: BTreeMap<String, i64>,
    }

    fn sample_job() -> Job {
        Job {
            id: 7,
            name: "with\0null".to_string(),
            tags: vec![],
            meta: BTreeMap::new(),
        }
    }

    fn roundtrip<C: Codec<Job>>(codec: C) {
        let job = sample_job();
        let bytes = codec.dump(&job).unwrap();
        assert_eq!(codec.load(&bytes).unwrap(), job, "{}", codec.name());
    }

    #[test]
    fn structured_codecs_roundtrip_null_bytes_and_empty_collections() {
        roundtrip(BinaryCodec);
        roundtrip(JsonCodec);
        roundtrip(YamlCodec);
    }

    #[test]
    fn binary_payload_contains_raw_null_byte() {
        let bytes = Codec::<String>::dump(&BinaryCodec, &"a\0b".to_string()).unwrap();
        assert!(bytes.contains(&0));
    }

    #[test]
    fn json_is_text() {
        let value = vec!["a".to_string()];
        let bytes = JsonCodec.dump(&value).unwrap();
        assert_eq!(bytes, br#"["a"]"#);
    }

    #[test]
    fn identity_passes_strings_through() {
        let bytes = IdentityCodec.dump(&"xchan\0".to_string()).unwrap();
        assert_eq!(bytes, b"xchan\0");

        let text: String = IdentityCodec.load(b"plain text").unwrap();
        assert_eq!(text, "plain text");
    }

    #[test]
    fn identity_rejects_structured_values() {
        let err = IdentityCodec.dump(&vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, CodecError::NotRaw("array")));
    }

    #[test]
    fn identity_rejects_invalid_utf8() {
        let err = Codec::<String>::load(&IdentityCodec, &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, CodecError::Utf8(_)));
    }

    #[test]
    fn truncated_binary_payload_fails() {
        let bytes = BinaryCodec.dump(&sample_job()).unwrap();
        let err = Codec::<Job>::load(&BinaryCodec, &bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, CodecError::Binary(_)));
    }
}
