//! Error types for MediSync core.

use crate::types::Tick;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in MediSync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The durable fact store is unavailable or rejected a write.
    ///
    /// A mutation that cannot persist its tick must fail rather than reuse
    /// one; callers treat this as fatal for the operation.
    #[error("fact store unavailable: {message}")]
    FactStore {
        /// Description of the failure.
        message: String,
    },

    /// A fact value could not be parsed as the expected type.
    #[error("malformed fact '{key}': {message}")]
    MalformedFact {
        /// The fact key.
        key: String,
        /// What was wrong with the stored value.
        message: String,
    },

    /// A peer reported a tick lower than one already committed for it.
    ///
    /// Applying it would violate the monotonicity invariant; never
    /// auto-healed.
    #[error("clock regression: peer reported {reported}, already committed {committed}")]
    ClockRegression {
        /// The tick the peer reported.
        reported: Tick,
        /// The tick already durably committed for that peer.
        committed: Tick,
    },

    /// A record or batch failed structural validation.
    #[error("integrity violation: {message}")]
    IntegrityViolation {
        /// Description of the structural failure.
        message: String,
    },

    /// A record type name not in the closed syncable set.
    #[error("unknown record type: {0}")]
    UnknownRecordType(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Creates a fact-store failure.
    pub fn fact_store(message: impl Into<String>) -> Self {
        Self::FactStore {
            message: message.into(),
        }
    }

    /// Creates an integrity violation.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            message: message.into(),
        }
    }
}
