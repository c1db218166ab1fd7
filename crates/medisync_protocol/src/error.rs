//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur encoding, decoding or validating protocol
/// material.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message failed structural validation.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A batch envelope declared a different record count than it carried.
    #[error("batch record count mismatch: declared {declared}, found {actual}")]
    RecordCountMismatch {
        /// Count declared in the envelope header.
        declared: u32,
        /// Records actually present.
        actual: u32,
    },

    /// A credential or signature could not be decoded.
    #[error("invalid credential material: {0}")]
    InvalidCredential(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates a malformed-message error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}
