//! Payload serializers.
//!
//! A serializer turns a typed payload into `(content type, bytes)` for the
//! outgoing message body, and back into the typed payload on reception.
//! The serializer is chosen once per `ServiceBusBuilder`; registrations
//! capture it when they are declared.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error raised while encoding or decoding a payload body.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// JSON encoding or decoding failed.
    #[error("json serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Bitcode encoding or decoding failed.
    #[cfg(feature = "bitcode")]
    #[error("bitcode serialization failed: {0}")]
    Bitcode(#[from] bitcode::Error),

    /// The dispatched payload is not of the type the registration expects.
    #[error("payload is not of type {expected}")]
    TypeMismatch { expected: &'static str },
}

/// Converts payloads to and from message bodies.
pub trait PayloadSerializer: Send + Sync + 'static {
    /// MIME type written to the message `content_type`.
    fn content_type(&self) -> &str;

    /// Encode a payload into a message body.
    fn serialize<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>, SerializationError>;

    /// Decode a message body into a payload.
    fn deserialize<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, SerializationError>;
}

/// JSON bodies (`application/json`). The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayloadSerializer;

impl PayloadSerializer for JsonPayloadSerializer {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn serialize<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(payload)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, SerializationError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Compact binary bodies using bitcode's serde support.
#[cfg(feature = "bitcode")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BitcodePayloadSerializer;

#[cfg(feature = "bitcode")]
impl PayloadSerializer for BitcodePayloadSerializer {
    fn content_type(&self) -> &str {
        "application/x-bitcode"
    }

    fn serialize<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>, SerializationError> {
        Ok(bitcode::serialize(payload)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, SerializationError> {
        Ok(bitcode::deserialize(body)?)
    }
}
