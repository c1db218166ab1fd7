//! Batch staging, transfer bookkeeping and idempotent application.
//!
//! The batcher sits between deterministic planning
//! ([`medisync_protocol::plan_batches`]) and the durable blob store: it
//! persists planned batches (reusing any already on disk from an
//! interrupted session), tracks per-batch transfer status, and detects
//! already-applied batches by status rather than re-validating every
//! record.

use crate::error::EngineResult;
use medisync_core::{BatchAddress, SessionId};
use medisync_protocol::{BatchEnvelope, BatchStatus, PlannedBatch};
use medisync_storage::BlobStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Durable batch staging plus the in-session status ledger.
pub struct Batcher {
    store: Arc<dyn BlobStore>,
    ledger: RwLock<HashMap<BatchAddress, BatchStatus>>,
}

impl Batcher {
    /// Creates a batcher over the given blob store.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            ledger: RwLock::new(HashMap::new()),
        }
    }

    /// Persists planned batches and returns the envelopes to transfer.
    ///
    /// A batch whose address already exists in the store (from an
    /// interrupted session; planning is deterministic, so the content is
    /// the same) is reused rather than rewritten.
    pub fn stage(&self, planned: Vec<PlannedBatch>) -> EngineResult<Vec<BatchEnvelope>> {
        let mut envelopes = Vec::with_capacity(planned.len());
        for batch in planned {
            let address = batch.address;
            let envelope = if self.store.contains(address)? {
                BatchEnvelope::from_bytes(&self.store.read(address)?)?
            } else {
                let envelope = BatchEnvelope::from_planned(batch);
                self.store.write(address, &envelope.to_bytes()?)?;
                envelope
            };
            self.ledger
                .write()
                .entry(address)
                .or_insert(BatchStatus::Planned);
            envelopes.push(envelope);
        }
        Ok(envelopes)
    }

    /// Durably stores a received batch before it is applied, so a resumed
    /// session can see what already arrived.
    pub fn store_incoming(&self, envelope: &BatchEnvelope) -> EngineResult<()> {
        if !self.store.contains(envelope.address)? {
            self.store.write(envelope.address, &envelope.to_bytes()?)?;
        }
        Ok(())
    }

    /// Reads back a staged or received batch.
    pub fn load(&self, address: BatchAddress) -> EngineResult<BatchEnvelope> {
        Ok(BatchEnvelope::from_bytes(&self.store.read(address)?)?)
    }

    /// Current transfer status of a batch, if tracked this session.
    pub fn status(&self, address: BatchAddress) -> Option<BatchStatus> {
        self.ledger.read().get(&address).copied()
    }

    /// Records a status change for a batch.
    pub fn mark(&self, address: BatchAddress, status: BatchStatus) {
        self.ledger.write().insert(address, status);
    }

    /// True once the peer has acknowledged this batch.
    pub fn is_acknowledged(&self, address: BatchAddress) -> bool {
        matches!(self.status(address), Some(BatchStatus::Acknowledged))
    }

    /// True once this batch has been applied locally; applying it again is
    /// a no-op.
    pub fn is_applied(&self, address: BatchAddress) -> bool {
        matches!(self.status(address), Some(BatchStatus::Applied))
    }

    /// Drops a session's batches and ledger entries once the session has
    /// fully committed (or its remains have lapsed).
    pub fn discard_session(&self, session_id: SessionId) -> EngineResult<()> {
        self.store.remove_session(session_id)?;
        self.ledger
            .write()
            .retain(|address, _| address.session_id != session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medisync_core::{ChangeRecord, Mutation, RecordType, Tick};
    use medisync_storage::MemoryBlobStore;
    use serde_json::json;

    fn planned(session: u64, index: u32, ids: &[&str]) -> PlannedBatch {
        let records = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                ChangeRecord::from_mutation(
                    Mutation::upsert(
                        RecordType::Allergy,
                        *id,
                        json!({ "patientId": "p1", "name": "dust" }),
                    ),
                    Tick::new((index as u64) * 10 + i as u64 + 1),
                )
            })
            .collect();
        PlannedBatch {
            address: BatchAddress::new(SessionId::new(session), RecordType::Allergy, index),
            records,
        }
    }

    fn batcher() -> Batcher {
        Batcher::new(Arc::new(MemoryBlobStore::new()))
    }

    #[test]
    fn stage_persists_and_tracks() {
        let batcher = batcher();
        let envelopes = batcher.stage(vec![planned(1, 0, &["a1", "a2"])]).unwrap();
        assert_eq!(envelopes.len(), 1);

        let address = envelopes[0].address;
        assert_eq!(batcher.status(address), Some(BatchStatus::Planned));
        assert_eq!(batcher.load(address).unwrap(), envelopes[0]);
    }

    #[test]
    fn stage_reuses_existing_blobs() {
        let store = Arc::new(MemoryBlobStore::new());
        let first = Batcher::new(store.clone());
        let original = first.stage(vec![planned(1, 0, &["a1"])]).unwrap();

        // a new batcher over the same store (restart) reuses the stored
        // payload byte-for-byte
        let resumed = Batcher::new(store);
        let restaged = resumed.stage(vec![planned(1, 0, &["a1"])]).unwrap();
        assert_eq!(restaged, original);
        assert_eq!(store_len(&resumed), 1);
    }

    fn store_len(batcher: &Batcher) -> usize {
        batcher.ledger.read().len()
    }

    #[test]
    fn status_transitions() {
        let batcher = batcher();
        let envelopes = batcher.stage(vec![planned(1, 0, &["a1"])]).unwrap();
        let address = envelopes[0].address;

        assert!(!batcher.is_acknowledged(address));
        batcher.mark(address, BatchStatus::Sent);
        batcher.mark(address, BatchStatus::Acknowledged);
        assert!(batcher.is_acknowledged(address));
    }

    #[test]
    fn applied_detection_is_by_status() {
        let batcher = batcher();
        let envelope = BatchEnvelope::from_planned(planned(2, 0, &["a1"]));

        assert!(!batcher.is_applied(envelope.address));
        batcher.store_incoming(&envelope).unwrap();
        batcher.mark(envelope.address, BatchStatus::Applied);
        assert!(batcher.is_applied(envelope.address));
    }

    #[test]
    fn staged_batches_survive_a_restart_on_disk() {
        use medisync_storage::FileBlobStore;

        let dir = tempfile::tempdir().unwrap();
        let plan = vec![planned(4, 0, &["a1"]), planned(4, 1, &["a2"])];

        let original = {
            let store = Arc::new(FileBlobStore::open(dir.path()).unwrap());
            Batcher::new(store).stage(plan.clone()).unwrap()
        };

        // a new process re-plans deterministically and reuses the files
        let store = Arc::new(FileBlobStore::open(dir.path()).unwrap());
        let resumed = Batcher::new(store).stage(plan).unwrap();
        assert_eq!(resumed, original);
    }

    #[test]
    fn discard_session_clears_blobs_and_ledger() {
        let batcher = batcher();
        batcher.stage(vec![planned(1, 0, &["a1"])]).unwrap();
        batcher.stage(vec![planned(2, 0, &["a2"])]).unwrap();

        batcher.discard_session(SessionId::new(1)).unwrap();

        let kept = BatchAddress::new(SessionId::new(2), RecordType::Allergy, 0);
        let dropped = BatchAddress::new(SessionId::new(1), RecordType::Allergy, 0);
        assert!(batcher.load(kept).is_ok());
        assert!(batcher.load(dropped).is_err());
        assert_eq!(batcher.status(dropped), None);
    }
}
