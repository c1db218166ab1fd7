//! In-memory blob store for testing.

use crate::backend::BlobStore;
use crate::error::{StorageError, StorageResult};
use medisync_core::{BatchAddress, SessionId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory blob store.
///
/// Contents do not survive the process; useful for unit tests and for
/// mobile clients that re-plan batches on every session anyway.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BatchAddress, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored batches, across all sessions.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, address: BatchAddress, payload: &[u8]) -> StorageResult<()> {
        self.blobs.write().insert(address, payload.to_vec());
        Ok(())
    }

    fn read(&self, address: BatchAddress) -> StorageResult<Vec<u8>> {
        self.blobs
            .read()
            .get(&address)
            .cloned()
            .ok_or_else(|| StorageError::not_found(address.to_string()))
    }

    fn contains(&self, address: BatchAddress) -> StorageResult<bool> {
        Ok(self.blobs.read().contains_key(&address))
    }

    fn remove_session(&self, session_id: SessionId) -> StorageResult<()> {
        self.blobs
            .write()
            .retain(|address, _| address.session_id != session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medisync_core::RecordType;

    fn address(session: u64, index: u32) -> BatchAddress {
        BatchAddress::new(SessionId::new(session), RecordType::Patient, index)
    }

    #[test]
    fn write_then_read() {
        let store = MemoryBlobStore::new();
        store.write(address(1, 0), b"payload").unwrap();
        assert_eq!(store.read(address(1, 0)).unwrap(), b"payload");
        assert!(store.contains(address(1, 0)).unwrap());
    }

    #[test]
    fn missing_address_is_not_found() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.read(address(1, 0)),
            Err(StorageError::NotFound { .. })
        ));
        assert!(!store.contains(address(1, 0)).unwrap());
    }

    #[test]
    fn rewrite_same_address_is_idempotent() {
        let store = MemoryBlobStore::new();
        store.write(address(1, 0), b"payload").unwrap();
        store.write(address(1, 0), b"payload").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_session_only_touches_that_session() {
        let store = MemoryBlobStore::new();
        store.write(address(1, 0), b"a").unwrap();
        store.write(address(1, 1), b"b").unwrap();
        store.write(address(2, 0), b"c").unwrap();

        store.remove_session(SessionId::new(1)).unwrap();
        assert!(!store.contains(address(1, 0)).unwrap());
        assert!(store.contains(address(2, 0)).unwrap());
    }
}
