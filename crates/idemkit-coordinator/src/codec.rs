//! Encoding of operation results and errors into record payloads.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Turns operation results and errors into stored payloads and back.
///
/// A replay must hand back a value equal to the original, so `decode(encode(v))`
/// has to reproduce `v` for every type the coordinator caches.
pub trait ResultCodec: Send + Sync + 'static {
    /// Short name used in error messages and logs.
    fn name(&self) -> &'static str;

    /// Encode a value into a payload.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, CodecError>;

    /// Decode a payload into a value.
    fn decode<T: DeserializeOwned>(&self, payload: &str) -> Result<T, CodecError>;
}

/// JSON payloads via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ResultCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|e| CodecError::Encode {
            codec: self.name(),
            reason: e.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, payload: &str) -> Result<T, CodecError> {
        serde_json::from_str(payload).map_err(|e| CodecError::Decode {
            codec: self.name(),
            reason: e.to_string(),
        })
    }
}
