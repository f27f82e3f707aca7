//! Pluggable serializer used for snapshots and `prepare` payloads.

use serde_json::Value;

use crate::error::Result;

/// Converts state values to and from their serialized string form.
///
/// The coordinator round-trips every snapshot through the configured
/// serializer, so a custom implementation controls the wire format handed to
/// `bootstrap` and returned by `take_snapshot`, `flush` and `prepare`.
pub trait Serializer: Send + Sync {
    /// Encode `value`.
    ///
    /// # Errors
    ///
    /// Returns [`AltError::Codec`](crate::AltError::Codec) if the value
    /// cannot be encoded.
    fn serialize(&self, value: &Value) -> Result<String>;

    /// Decode `data` back into a value.
    ///
    /// # Errors
    ///
    /// Returns [`AltError::Codec`](crate::AltError::Codec) if `data` is not
    /// valid for this codec.
    fn deserialize(&self, data: &str) -> Result<Value>;
}

/// Compact JSON, the default serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        Ok(serde_json::from_str(data)?)
    }
}
