//! Core type definitions for MediSync.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Logical sequence number totally ordering changes across the deployment.
///
/// Ticks are monotonically increasing within one node's change log and are
/// never reused. The central tier owns the canonical sequence; other tiers
/// reconcile against it at session start.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Tick(pub u64);

impl Tick {
    /// The "never synced" bookmark.
    pub const ZERO: Tick = Tick(0);

    /// Creates a new tick.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw tick value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the tick one past this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick:{}", self.0)
    }
}

/// Identifier for one bounded push/pull exchange between two peers.
///
/// Session ids are drawn from a dedicated durable counter, distinct from the
/// tick sequence, so concurrent sessions never collide.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Creates a new session id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Stable identity of a syncing device (a facility server or mobile client).
///
/// The device id is the peer identity proven by the challenge handshake and
/// the key under which per-peer sync bookmarks are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    /// Creates a device id from an existing UUID.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random device id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device:{}", self.0)
    }
}

/// Position of a node in the deployment trust hierarchy.
///
/// Used as the conflict tie-break: when two changes carry the same tick, the
/// change from the higher tier wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeTier {
    /// The central server, owner of the canonical tick sequence.
    Central,
    /// A facility server.
    Facility,
    /// A mobile / offline client.
    Mobile,
}

impl NodeTier {
    /// Trust precedence; higher wins conflict tie-breaks.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            NodeTier::Central => 2,
            NodeTier::Facility => 1,
            NodeTier::Mobile => 0,
        }
    }
}

impl fmt::Display for NodeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeTier::Central => "central",
            NodeTier::Facility => "facility",
            NodeTier::Mobile => "mobile",
        };
        f.write_str(name)
    }
}

/// Which phase of a session produced a transferred change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Received from the peer during the pull phase (or a pushed upload,
    /// seen from the responder).
    Incoming,
    /// Snapshotted locally for transfer to the peer.
    Outgoing,
}

/// Durable address of one batch: `(session, record type, index)`.
///
/// The same address always refers to the same content; batch planning is
/// deterministic, which is what makes resumption safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAddress {
    /// Session the batch belongs to.
    pub session_id: SessionId,
    /// Record type the batch carries.
    pub record_type: crate::record::RecordType,
    /// Zero-based position within the (session, record type) sequence.
    pub batch_index: u32,
}

impl BatchAddress {
    /// Creates a batch address.
    #[must_use]
    pub const fn new(
        session_id: SessionId,
        record_type: crate::record::RecordType,
        batch_index: u32,
    ) -> Self {
        Self {
            session_id,
            record_type,
            batch_index,
        }
    }
}

impl fmt::Display for BatchAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/batch{:010}",
            self.session_id,
            self.record_type.as_str(),
            self.batch_index
        )
    }
}

/// Milliseconds since the Unix epoch; wall-clock timestamps are audit
/// metadata only and never participate in ordering.
#[must_use]
pub fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_ordering() {
        assert!(Tick::new(1) < Tick::new(2));
        assert_eq!(Tick::ZERO.next(), Tick::new(1));
    }

    #[test]
    fn tier_precedence() {
        assert!(NodeTier::Central.precedence() > NodeTier::Facility.precedence());
        assert!(NodeTier::Facility.precedence() > NodeTier::Mobile.precedence());
    }

    #[test]
    fn display_formats() {
        assert_eq!(Tick::new(7).to_string(), "tick:7");
        assert_eq!(SessionId::new(3).to_string(), "session:3");
        assert_eq!(NodeTier::Facility.to_string(), "facility");
    }

    #[test]
    fn batch_address_display_is_zero_padded() {
        let address = BatchAddress::new(
            SessionId::new(12),
            crate::record::RecordType::Allergy,
            7,
        );
        assert_eq!(address.to_string(), "session:12/allergy/batch0000000007");
    }

    #[test]
    fn tick_serde_transparent() {
        let json = serde_json::to_string(&Tick::new(42)).unwrap();
        assert_eq!(json, "42");
        let tick: Tick = serde_json::from_str("42").unwrap();
        assert_eq!(tick, Tick::new(42));
    }
}
