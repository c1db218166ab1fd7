//! Blob store trait definition.

use crate::error::StorageResult;
use medisync_core::{BatchAddress, SessionId};

/// A durable, keyed store for batch payloads.
///
/// Blob stores are **opaque byte stores** addressed by [`BatchAddress`].
/// The engine owns the payload format; stores do not interpret batch
/// contents.
///
/// # Invariants
///
/// - `read` returns exactly the bytes previously written at that address
/// - Writing the same address twice with identical bytes is a no-op;
///   writing different bytes to an existing address is a caller bug the
///   store is not required to detect
/// - `contains` reflects all completed `write` calls, across restarts for
///   persistent implementations
///
/// # Implementors
///
/// - [`super::MemoryBlobStore`] - for tests
/// - [`super::FileBlobStore`] - for persistent storage
pub trait BlobStore: Send + Sync {
    /// Durably writes a batch payload at the given address.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be durably persisted.
    fn write(&self, address: BatchAddress, payload: &[u8]) -> StorageResult<()>;

    /// Reads the payload previously written at the given address.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if nothing was written
    /// there.
    fn read(&self, address: BatchAddress) -> StorageResult<Vec<u8>>;

    /// Returns true if a payload exists at the given address.
    fn contains(&self, address: BatchAddress) -> StorageResult<bool>;

    /// Removes every batch stored for a session.
    ///
    /// Used when a completed or lapsed session's batches are no longer
    /// needed; removing a session with no batches is a no-op.
    fn remove_session(&self, session_id: SessionId) -> StorageResult<()>;
}
