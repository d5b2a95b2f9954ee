//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or parsing link messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload cannot be described by the 32-bit length field.
    #[error("payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: u32 },

    /// Failed to serialize or parse JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Text message is valid JSON but has no string `type` field.
    #[error("message has no type field")]
    MissingType,
}
