//! Error types for batch storage.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in a batch blob store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No blob exists at the requested address.
    #[error("batch not found: {address}")]
    NotFound {
        /// Human-readable address of the missing batch.
        address: String,
    },

    /// An I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Creates a not-found error for the given address.
    pub fn not_found(address: impl Into<String>) -> Self {
        Self::NotFound {
            address: address.into(),
        }
    }
}
