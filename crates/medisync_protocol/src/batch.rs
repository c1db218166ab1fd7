//! Deterministic batch planning.
//!
//! A session's outgoing changes are partitioned by record type (in apply
//! order, so foreign-key parents always land before children) and then
//! chunked to a maximum size. Planning is a pure function of its inputs:
//! re-planning after a crash reproduces the same batch identities with the
//! same contents, which is what makes already-transferred batches safe to
//! skip.

use medisync_core::{BatchAddress, ChangeRecord, RecordType, SessionId};
use serde::{Deserialize, Serialize};

/// Transfer status of one batch within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Planned and persisted, not yet transferred.
    Planned,
    /// Sent to the peer, acknowledgement pending.
    Sent,
    /// Acknowledged by the peer (sender side terminal state).
    Acknowledged,
    /// Applied to the local change log (receiver side terminal state).
    Applied,
}

impl BatchStatus {
    /// True once no further transfer work remains for this batch.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Acknowledged | BatchStatus::Applied)
    }
}

/// One planned batch: an address plus the records it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBatch {
    /// Durable address of this batch.
    pub address: BatchAddress,
    /// Records in tick order, all of `address.record_type`.
    pub records: Vec<ChangeRecord>,
}

/// Partitions `changes` into ordered batches for `session_id`.
///
/// Changes are grouped by record type in [`RecordType::ALL`] order, with
/// the relative (tick) order inside each group preserved, then chunked to
/// at most `max_batch_size` records. A `max_batch_size` of zero is treated
/// as one.
#[must_use]
pub fn plan_batches(
    session_id: SessionId,
    changes: &[ChangeRecord],
    max_batch_size: usize,
) -> Vec<PlannedBatch> {
    let chunk_size = max_batch_size.max(1);
    let mut batches = Vec::new();

    for record_type in RecordType::ALL {
        let group: Vec<&ChangeRecord> = changes
            .iter()
            .filter(|record| record.record_type == record_type)
            .collect();

        for (index, chunk) in group.chunks(chunk_size).enumerate() {
            batches.push(PlannedBatch {
                address: BatchAddress::new(session_id, record_type, index as u32),
                records: chunk.iter().map(|record| (*record).clone()).collect(),
            });
        }
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use medisync_core::{Mutation, Tick};
    use proptest::prelude::*;
    use serde_json::json;

    fn record(record_type: RecordType, id: &str, tick: u64) -> ChangeRecord {
        let payload = match record_type {
            RecordType::Patient => {
                json!({ "displayId": id, "firstName": "A", "lastName": "B" })
            }
            RecordType::Encounter => json!({ "patientId": "p", "encounterType": "clinic" }),
            _ => json!({ "patientId": "p", "name": id }),
        };
        ChangeRecord::from_mutation(
            Mutation::upsert(record_type, id, payload),
            Tick::new(tick),
        )
    }

    #[test]
    fn groups_by_type_in_apply_order() {
        let session = SessionId::new(1);
        let changes = vec![
            record(RecordType::Allergy, "a1", 3),
            record(RecordType::Patient, "p1", 1),
            record(RecordType::Encounter, "e1", 2),
        ];

        let batches = plan_batches(session, &changes, 100);
        let types: Vec<RecordType> = batches.iter().map(|b| b.address.record_type).collect();
        assert_eq!(
            types,
            vec![RecordType::Patient, RecordType::Encounter, RecordType::Allergy]
        );
    }

    #[test]
    fn chunks_to_max_size_with_sequential_indices() {
        let session = SessionId::new(2);
        let changes: Vec<ChangeRecord> = (0..7)
            .map(|i| record(RecordType::Allergy, &format!("a{i}"), i + 1))
            .collect();

        let batches = plan_batches(session, &changes, 3);
        assert_eq!(batches.len(), 3);
        assert_eq!(
            batches.iter().map(|b| b.address.batch_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(batches[0].records.len(), 3);
        assert_eq!(batches[2].records.len(), 1);
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let session = SessionId::new(3);
        let changes = vec![record(RecordType::Allergy, "a1", 1)];
        let batches = plan_batches(session, &changes, 0);
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn empty_input_plans_nothing() {
        assert!(plan_batches(SessionId::new(4), &[], 10).is_empty());
    }

    proptest! {
        #[test]
        fn planning_is_deterministic(count in 0usize..40, batch_size in 1usize..10) {
            let changes: Vec<ChangeRecord> = (0..count)
                .map(|i| {
                    let record_type = RecordType::ALL[i % RecordType::ALL.len()];
                    record(record_type, &format!("r{i}"), (i as u64) + 1)
                })
                .collect();

            let session = SessionId::new(7);
            let first = plan_batches(session, &changes, batch_size);
            let second = plan_batches(session, &changes, batch_size);
            prop_assert_eq!(&first, &second);

            // no records lost or duplicated
            let total: usize = first.iter().map(|b| b.records.len()).sum();
            prop_assert_eq!(total, count);
        }
    }
}
