//! Protocol messages for a sync session.
//!
//! Messages are JSON on the wire; batch payloads persisted by the blob
//! store use exactly the [`BatchEnvelope`] encoding, so a stored batch can
//! be transferred byte-for-byte.

use crate::batch::PlannedBatch;
use crate::error::{ProtocolError, ProtocolResult};
use medisync_core::{BatchAddress, ChangeRecord, DeviceId, NodeTier, SessionId, Tick};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current sync protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Encodes a message as JSON bytes.
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decodes a message from JSON bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Opening request of a session, sent after the handshake.
///
/// The session id is allocated by the initiator from its dedicated durable
/// counter when the session row is created, before any exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    /// The proposed session id.
    pub session_id: SessionId,
    /// The initiating device.
    pub device_id: DeviceId,
    /// The initiating node's tier.
    pub tier: NodeTier,
    /// Protocol version spoken by the initiator.
    pub protocol_version: u16,
    /// The initiator's last fully-committed tick for this peer.
    pub last_synced_tick: Tick,
}

impl SessionRequest {
    /// Creates a session request at the current protocol version.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        device_id: DeviceId,
        tier: NodeTier,
        last_synced_tick: Tick,
    ) -> Self {
        Self {
            session_id,
            device_id,
            tier,
            protocol_version: PROTOCOL_VERSION,
            last_synced_tick,
        }
    }
}

/// The responder's grant of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    /// The granted session id (echoes the request).
    pub session_id: SessionId,
    /// The responding node's tier, used by the initiator's conflict
    /// tie-break.
    pub tier: NodeTier,
    /// Negotiated window start: the max of each side's bookmark for the
    /// other; both sides compute the same value.
    pub start_tick: Tick,
    /// Fresh tick allocated for this session; the initiator adopts it so
    /// every mutation it makes from here on sorts after the window.
    pub session_tick: Tick,
}

/// An ordered chunk of change records for one record type, as transferred
/// and as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEnvelope {
    /// Durable address of this batch.
    pub address: BatchAddress,
    /// Declared number of records; checked against `records` on decode.
    pub record_count: u32,
    /// The records, in tick order.
    pub records: Vec<ChangeRecord>,
}

impl BatchEnvelope {
    /// Wraps a planned batch for transfer.
    #[must_use]
    pub fn from_planned(batch: PlannedBatch) -> Self {
        Self {
            address: batch.address,
            record_count: batch.records.len() as u32,
            records: batch.records,
        }
    }

    /// Validates the envelope's structural integrity.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RecordCountMismatch`] if the declared count does
    /// not match the carried records;
    /// [`ProtocolError::Malformed`] if a record's type disagrees with the
    /// address.
    pub fn validate(&self) -> ProtocolResult<()> {
        let actual = self.records.len() as u32;
        if self.record_count != actual {
            return Err(ProtocolError::RecordCountMismatch {
                declared: self.record_count,
                actual,
            });
        }
        for record in &self.records {
            if record.record_type != self.address.record_type {
                return Err(ProtocolError::malformed(format!(
                    "batch {} carries a {} record",
                    self.address, record.record_type
                )));
            }
        }
        Ok(())
    }

    /// Encodes the envelope, as stored and as sent.
    pub fn to_bytes(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes and validates an envelope.
    pub fn from_bytes(bytes: &[u8]) -> ProtocolResult<Self> {
        let envelope: Self = decode(bytes)?;
        envelope.validate()?;
        Ok(envelope)
    }
}

/// Per-batch acknowledgement from the receiving peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAck {
    /// The acknowledged batch.
    pub address: BatchAddress,
}

/// Final message of a session: the initiator reports the highest tick it
/// observed and asks the responder to commit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    /// The session being completed.
    pub session_id: SessionId,
    /// Highest tick observed across both directions.
    pub end_tick: Tick,
}
