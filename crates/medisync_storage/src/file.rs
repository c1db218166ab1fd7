//! File-based blob store for persistent batch storage.

use crate::backend::BlobStore;
use crate::error::{StorageError, StorageResult};
use medisync_core::{BatchAddress, SessionId};
use std::path::{Path, PathBuf};

/// A file-backed blob store.
///
/// Batches survive process restarts, which is what lets a resumed session
/// reuse already-written batches instead of regenerating them. Layout under
/// the root directory:
///
/// ```text
/// syncSessions/{sessionId}/{recordType}/batch{batchIndex:010}.json
/// ```
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash mid-write never leaves a truncated batch at a valid address.
#[derive(Debug)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Directory under the root that holds all session batches.
    const SESSIONS_DIR: &'static str = "syncSessions";

    /// Opens a blob store rooted at the given directory, creating it if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(root.join(Self::SESSIONS_DIR))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn batch_path(&self, address: BatchAddress) -> PathBuf {
        self.root
            .join(Self::SESSIONS_DIR)
            .join(address.session_id.as_u64().to_string())
            .join(address.record_type.as_str())
            .join(format!("batch{:010}.json", address.batch_index))
    }

    fn session_dir(&self, session_id: SessionId) -> PathBuf {
        self.root
            .join(Self::SESSIONS_DIR)
            .join(session_id.as_u64().to_string())
    }
}

impl BlobStore for FileBlobStore {
    fn write(&self, address: BatchAddress, payload: &[u8]) -> StorageResult<()> {
        let path = self.batch_path(address);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read(&self, address: BatchAddress) -> StorageResult<Vec<u8>> {
        let path = self.batch_path(address);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(address.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, address: BatchAddress) -> StorageResult<bool> {
        Ok(self.batch_path(address).exists())
    }

    fn remove_session(&self, session_id: SessionId) -> StorageResult<()> {
        let dir = self.session_dir(session_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
