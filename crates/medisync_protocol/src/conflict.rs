//! Conflict detection and resolution policy.
//!
//! A conflict exists when an incoming change and a locally-held change
//! touch the same record inside the session's reconciliation window. The
//! policy is last-writer-wins by tick, with the deployment trust hierarchy
//! as the tie-break; richer clinical merging is the owning application's
//! concern, not the engine's.

use medisync_core::{now_millis, ChangeRecord, ConflictRecord, NodeTier};

/// Which side of a conflicting pair survives as the live entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// The incoming (remote) change wins; it becomes the live view.
    Incoming,
    /// The locally-held change wins; the incoming record is retained in
    /// the change log but does not displace the entity.
    Local,
}

/// The outcome of resolving one conflicting pair.
///
/// Exactly one [`ConflictRecord`] audit entry is produced per resolved
/// pair; the losing change record is never deleted from the change log.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Which side won.
    pub winner: Winner,
    /// The audit trail entry for the discarded side.
    pub conflict: ConflictRecord,
}

/// Resolves a conflicting pair deterministically.
///
/// The record with the higher tick wins. On a tick tie the record from the
/// higher tier wins (central over facility over mobile), reflecting the
/// deployment's trust hierarchy; ties within the same tier keep the local
/// side, so re-resolving is a no-op everywhere.
///
/// Both peers evaluating the same pair reach the same outcome, whichever
/// side each record arrived from.
#[must_use]
pub fn resolve(
    incoming: &ChangeRecord,
    incoming_tier: NodeTier,
    local: &ChangeRecord,
    local_tier: NodeTier,
) -> Resolution {
    debug_assert_eq!(incoming.record_type, local.record_type);
    debug_assert_eq!(incoming.record_id, local.record_id);

    let incoming_wins = match incoming.tick.cmp(&local.tick) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => incoming_tier.precedence() > local_tier.precedence(),
    };

    let (winner, winning, losing) = if incoming_wins {
        (Winner::Incoming, incoming, local)
    } else {
        (Winner::Local, local, incoming)
    };

    Resolution {
        winner,
        conflict: ConflictRecord {
            record_type: winning.record_type,
            record_id: winning.record_id.clone(),
            winning_tick: winning.tick,
            losing_tick: losing.tick,
            resolved_at: now_millis(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medisync_core::{Mutation, RecordType, Tick};
    use serde_json::json;

    fn allergy(name: &str, tick: u64) -> ChangeRecord {
        ChangeRecord::from_mutation(
            Mutation::upsert(
                RecordType::Allergy,
                "x",
                json!({ "patientId": "p1", "name": name }),
            ),
            Tick::new(tick),
        )
    }

    #[test]
    fn higher_tick_wins() {
        let incoming = allergy("remote", 103);
        let local = allergy("local", 102);

        let resolution = resolve(&incoming, NodeTier::Mobile, &local, NodeTier::Central);
        assert_eq!(resolution.winner, Winner::Incoming);
        assert_eq!(resolution.conflict.winning_tick, Tick::new(103));
        assert_eq!(resolution.conflict.losing_tick, Tick::new(102));
    }

    #[test]
    fn lower_tick_loses_regardless_of_tier() {
        let incoming = allergy("remote", 101);
        let local = allergy("local", 102);

        let resolution = resolve(&incoming, NodeTier::Central, &local, NodeTier::Mobile);
        assert_eq!(resolution.winner, Winner::Local);
        assert_eq!(resolution.conflict.winning_tick, Tick::new(102));
    }

    #[test]
    fn tick_tie_breaks_by_tier() {
        let incoming = allergy("central", 100);
        let local = allergy("facility", 100);

        let resolution = resolve(&incoming, NodeTier::Central, &local, NodeTier::Facility);
        assert_eq!(resolution.winner, Winner::Incoming);

        // and the other way around
        let resolution = resolve(&incoming, NodeTier::Mobile, &local, NodeTier::Facility);
        assert_eq!(resolution.winner, Winner::Local);
    }

    #[test]
    fn full_tie_keeps_local() {
        let incoming = allergy("a", 100);
        let local = allergy("b", 100);
        let resolution = resolve(&incoming, NodeTier::Facility, &local, NodeTier::Facility);
        assert_eq!(resolution.winner, Winner::Local);
    }

    #[test]
    fn resolution_is_deterministic() {
        let incoming = allergy("remote", 103);
        let local = allergy("local", 102);

        let first = resolve(&incoming, NodeTier::Facility, &local, NodeTier::Central);
        let second = resolve(&incoming, NodeTier::Facility, &local, NodeTier::Central);
        assert_eq!(first.winner, second.winner);
        assert_eq!(first.conflict.winning_tick, second.conflict.winning_tick);
        assert_eq!(first.conflict.losing_tick, second.conflict.losing_tick);
    }

    #[test]
    fn mirrored_evaluation_agrees() {
        // peer A sees B's record as incoming; peer B sees A's record as
        // incoming; both must crown the same tick
        let a_side = allergy("from_b", 103);
        let b_side = allergy("from_a", 102);

        let at_a = resolve(&a_side, NodeTier::Facility, &b_side, NodeTier::Central);
        let at_b = resolve(&b_side, NodeTier::Central, &a_side, NodeTier::Facility);

        assert_eq!(at_a.conflict.winning_tick, at_b.conflict.winning_tick);
        assert_eq!(at_a.winner, Winner::Incoming);
        assert_eq!(at_b.winner, Winner::Local);
    }
}
