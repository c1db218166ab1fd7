//! The durable change log.
//!
//! Every mutation to a syncable entity is captured here as a
//! [`ChangeRecord`] stamped with the tick at which it was written. The log
//! is the source of truth for what a peer still needs to see: deletes are
//! tombstones, losing sides of conflicts are retained, and nothing is ever
//! physically removed.

use crate::clock::LogicalClock;
use crate::error::{CoreError, CoreResult};
use crate::record::{ChangeRecord, ConflictRecord, Mutation, RecordType};
use crate::types::{Direction, SessionId, Tick};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// How an inserted record may affect the per-entity live view.
#[derive(Debug, Clone, Copy)]
enum LiveUpdate {
    /// Higher tick displaces; equal tick displaces only when `win_ties`.
    Auto {
        /// Set for a record crowned by the tier tie-break.
        win_ties: bool,
    },
    /// Retained for audit only; the live view is untouched.
    Never,
}

/// Tick-ordered log of row-level mutations, plus the conflict audit trail.
///
/// Supports concurrent readers (push/pull planning) with short write locks
/// per appended record.
pub struct ChangeLog {
    clock: Arc<LogicalClock>,
    /// Entries in (tick, record_type, record_id) order.
    entries: RwLock<Vec<ChangeRecord>>,
    /// Live view: the highest-tick record per entity.
    latest: RwLock<HashMap<(RecordType, String), ChangeRecord>>,
    /// Audit trail of resolved conflicts.
    conflicts: RwLock<Vec<ConflictRecord>>,
}

impl ChangeLog {
    /// Creates an empty change log over the given clock.
    pub fn new(clock: Arc<LogicalClock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(Vec::new()),
            latest: RwLock::new(HashMap::new()),
            conflicts: RwLock::new(Vec::new()),
        }
    }

    /// Returns the clock this log stamps mutations with.
    pub fn clock(&self) -> &Arc<LogicalClock> {
        &self.clock
    }

    /// Records a local mutation.
    ///
    /// The payload is validated against the record type's schema before a
    /// tick is allocated: either the entity change and its change record
    /// both happen, or neither does.
    ///
    /// # Errors
    ///
    /// [`CoreError::IntegrityViolation`] on schema failure;
    /// [`CoreError::FactStore`] if the tick cannot be durably allocated.
    pub fn record(&self, mutation: Mutation) -> CoreResult<ChangeRecord> {
        if let Some(payload) = &mutation.payload {
            mutation.record_type.validate_payload(payload)?;
        }
        let tick = self.clock.next_tick()?;
        let record = ChangeRecord::from_mutation(mutation, tick);
        self.insert(record.clone(), LiveUpdate::Auto { win_ties: false });
        Ok(record)
    }

    /// Applies a change record received from a peer.
    ///
    /// The record keeps its wire tick unless `restamp` is given (the central
    /// tier re-stamps pushed records at the session's tock so they become
    /// visible to every other peer's bookmark). The local clock is advanced
    /// past the stored tick, and the record is tagged as incoming for the
    /// given session.
    ///
    /// Conflict detection happens before this call; losing records are
    /// still applied (retained in the log) but never displace a
    /// higher-tick live view. `win_ties` is set when the resolver crowned
    /// this record over an equal-tick local competitor (the tier
    /// tie-break), so it takes the live view despite the tie.
    pub fn apply_incoming(
        &self,
        record: &ChangeRecord,
        session_id: SessionId,
        restamp: Option<Tick>,
        win_ties: bool,
    ) -> CoreResult<ChangeRecord> {
        if let Some(payload) = &record.payload {
            record.record_type.validate_payload(payload)?;
        } else if record.deleted_at.is_none() {
            return Err(CoreError::integrity(format!(
                "{} '{}' has neither payload nor deletion timestamp",
                record.record_type, record.record_id
            )));
        }

        let mut applied = record.tagged(Direction::Incoming, session_id);
        if let Some(tick) = restamp {
            applied.tick = tick;
        }
        self.clock.advance_to(applied.tick)?;
        self.insert(applied.clone(), LiveUpdate::Auto { win_ties });
        Ok(applied)
    }

    /// Retains an incoming record that lost its conflict: it joins the log
    /// (audit, late-peer visibility) but never displaces the live view.
    pub fn apply_incoming_retained(
        &self,
        record: &ChangeRecord,
        session_id: SessionId,
    ) -> CoreResult<ChangeRecord> {
        let retained = record.tagged(Direction::Incoming, session_id);
        self.clock.advance_to(retained.tick)?;
        self.insert(retained.clone(), LiveUpdate::Never);
        Ok(retained)
    }

    fn insert(&self, record: ChangeRecord, live: LiveUpdate) {
        {
            let mut entries = self.entries.write();
            let at = entries.partition_point(|existing| {
                (existing.tick, existing.record_type, existing.record_id.as_str())
                    <= (record.tick, record.record_type, record.record_id.as_str())
            });
            entries.insert(at, record.clone());
        }

        let LiveUpdate::Auto { win_ties } = live else {
            return;
        };

        let mut latest = self.latest.write();
        let key = (record.record_type, record.record_id.clone());
        let displaced = match latest.get(&key) {
            None => true,
            Some(existing) if record.tick > existing.tick => true,
            Some(existing) => win_ties && record.tick == existing.tick,
        };
        if displaced {
            latest.insert(key, record);
        }
    }

    /// Returns up to `limit` changes with tick strictly greater than
    /// `since`, in tick order, optionally filtered by record type.
    ///
    /// Restarting with the same `since` yields the same prefix until new
    /// ticks arrive, which is what makes batching resumable.
    pub fn changes_since(
        &self,
        since: Tick,
        record_types: Option<&[RecordType]>,
        limit: usize,
    ) -> Vec<ChangeRecord> {
        let entries = self.entries.read();
        let start = entries.partition_point(|record| record.tick <= since);
        entries[start..]
            .iter()
            .filter(|record| {
                record_types
                    .map(|types| types.contains(&record.record_type))
                    .unwrap_or(true)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Snapshots outgoing changes for a session: everything past `since`,
    /// tagged [`Direction::Outgoing`], excluding records that the same
    /// session pushed into this log (a peer never pulls back its own
    /// uploads).
    pub fn snapshot_outgoing(&self, since: Tick, session_id: SessionId) -> Vec<ChangeRecord> {
        let entries = self.entries.read();
        let start = entries.partition_point(|record| record.tick <= since);
        entries[start..]
            .iter()
            .filter(|record| record.session_id != Some(session_id))
            .map(|record| record.tagged(Direction::Outgoing, session_id))
            .collect()
    }

    /// True if a change with exactly this (tick, type, id) identity is
    /// already in the log; re-applying it is a no-op.
    pub fn contains(&self, record_type: RecordType, record_id: &str, tick: Tick) -> bool {
        let entries = self.entries.read();
        let start = entries.partition_point(|record| record.tick < tick);
        entries[start..]
            .iter()
            .take_while(|record| record.tick == tick)
            .any(|record| record.record_type == record_type && record.record_id == record_id)
    }

    /// The newest change to an entity, if any (the live view; may be a
    /// tombstone).
    pub fn latest_for(&self, record_type: RecordType, record_id: &str) -> Option<ChangeRecord> {
        self.latest
            .read()
            .get(&(record_type, record_id.to_string()))
            .cloned()
    }

    /// The newest *locally held* change to an entity with tick strictly
    /// greater than `since`; the competitor the conflict resolver compares
    /// an incoming record against.
    pub fn competitor_since(
        &self,
        record_type: RecordType,
        record_id: &str,
        since: Tick,
    ) -> Option<ChangeRecord> {
        self.latest_for(record_type, record_id)
            .filter(|record| record.tick > since)
    }

    /// Appends a conflict audit entry.
    pub fn record_conflict(&self, conflict: ConflictRecord) {
        tracing::debug!(
            record_type = %conflict.record_type,
            record_id = %conflict.record_id,
            winning = %conflict.winning_tick,
            losing = %conflict.losing_tick,
            "conflict resolved"
        );
        self.conflicts.write().push(conflict);
    }

    /// The conflict audit trail so far.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.read().clone()
    }

    /// The highest tick present in the log.
    pub fn highest_tick(&self) -> Tick {
        self.entries
            .read()
            .last()
            .map(|record| record.tick)
            .unwrap_or(Tick::ZERO)
    }

    /// Total number of change records (tombstones and losers included).
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
