//! The syncable record model.
//!
//! Record payloads are schema-less JSON at the transport level, but the set
//! of syncable record types is closed and each type declares the fields a
//! payload must carry. Validation happens once, at the change-log boundary;
//! everything downstream trusts a stored [`ChangeRecord`].

use crate::error::{CoreError, CoreResult};
use crate::types::{now_millis, Direction, SessionId, Tick};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The closed set of syncable clinical record types.
///
/// The variant order is the apply order: parents before children, so that
/// batches applied type-by-type never reference a row that has not landed
/// yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// A patient demographic record.
    Patient,
    /// A clinician or other staff member.
    Practitioner,
    /// A facility in the deployment.
    Facility,
    /// A patient encounter (admission, clinic visit).
    Encounter,
    /// An allergy registered against a patient.
    Allergy,
    /// A medication order within an encounter.
    Medication,
    /// An administered vaccination.
    Vaccination,
    /// A laboratory test request.
    LabRequest,
    /// A completed survey/questionnaire response.
    SurveyResponse,
}

impl RecordType {
    /// All record types in apply order.
    pub const ALL: [RecordType; 9] = [
        RecordType::Patient,
        RecordType::Practitioner,
        RecordType::Facility,
        RecordType::Encounter,
        RecordType::Allergy,
        RecordType::Medication,
        RecordType::Vaccination,
        RecordType::LabRequest,
        RecordType::SurveyResponse,
    ];

    /// Stable wire/storage name for this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordType::Patient => "patient",
            RecordType::Practitioner => "practitioner",
            RecordType::Facility => "facility",
            RecordType::Encounter => "encounter",
            RecordType::Allergy => "allergy",
            RecordType::Medication => "medication",
            RecordType::Vaccination => "vaccination",
            RecordType::LabRequest => "lab_request",
            RecordType::SurveyResponse => "survey_response",
        }
    }

    /// Parses a stable name back into a record type.
    pub fn parse(name: &str) -> CoreResult<Self> {
        RecordType::ALL
            .into_iter()
            .find(|rt| rt.as_str() == name)
            .ok_or_else(|| CoreError::UnknownRecordType(name.to_string()))
    }

    /// Payload fields that must be present and non-null for this type.
    #[must_use]
    pub const fn required_fields(self) -> &'static [&'static str] {
        match self {
            RecordType::Patient => &["displayId", "firstName", "lastName"],
            RecordType::Practitioner => &["displayName"],
            RecordType::Facility => &["name"],
            RecordType::Encounter => &["patientId", "encounterType"],
            RecordType::Allergy => &["patientId", "name"],
            RecordType::Medication => &["encounterId", "medication"],
            RecordType::Vaccination => &["patientId", "vaccine"],
            RecordType::LabRequest => &["encounterId", "displayId"],
            RecordType::SurveyResponse => &["encounterId", "surveyId"],
        }
    }

    /// Validates a payload against this type's structural schema.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IntegrityViolation`] if the payload is not an
    /// object or a required field is missing or null.
    pub fn validate_payload(self, payload: &Value) -> CoreResult<()> {
        let object = payload.as_object().ok_or_else(|| {
            CoreError::integrity(format!("{self} payload is not a JSON object"))
        })?;

        for field in self.required_fields() {
            match object.get(*field) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(CoreError::integrity(format!(
                        "{self} payload missing required field '{field}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row-level mutation as reported by the record-store collaborator.
///
/// Every create/update/delete on a syncable entity must be turned into a
/// `Mutation` and recorded in the same transaction as the entity write.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Type of the mutated entity.
    pub record_type: RecordType,
    /// Entity identifier.
    pub record_id: String,
    /// New payload; `None` marks a deletion.
    pub payload: Option<Value>,
}

impl Mutation {
    /// A create-or-update mutation.
    pub fn upsert(record_type: RecordType, record_id: impl Into<String>, payload: Value) -> Self {
        Self {
            record_type,
            record_id: record_id.into(),
            payload: Some(payload),
        }
    }

    /// A delete mutation; recorded as a tombstone, never a physical removal.
    pub fn delete(record_type: RecordType, record_id: impl Into<String>) -> Self {
        Self {
            record_type,
            record_id: record_id.into(),
            payload: None,
        }
    }
}

/// One row-level mutation snapshot captured for sync purposes.
///
/// Immutable once written, except for the transfer tags (`direction`,
/// `session_id`) stamped when the record moves through a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Type of the mutated entity.
    pub record_type: RecordType,
    /// Entity identifier.
    pub record_id: String,
    /// Payload snapshot; absent for tombstones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Tick at which the mutation was written.
    pub tick: Tick,
    /// Which session phase produced this record, once transferred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// The session that transferred this record, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Deletion timestamp (epoch millis) for tombstones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<u64>,
}

impl ChangeRecord {
    /// Builds a change record for a mutation at the given tick.
    #[must_use]
    pub fn from_mutation(mutation: Mutation, tick: Tick) -> Self {
        let deleted_at = mutation.payload.is_none().then(now_millis);
        Self {
            record_type: mutation.record_type,
            record_id: mutation.record_id,
            payload: mutation.payload,
            tick,
            direction: None,
            session_id: None,
            deleted_at,
        }
    }

    /// True if this record represents a deletion.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }

    /// Returns a copy tagged as transferred by the given session phase.
    #[must_use]
    pub fn tagged(&self, direction: Direction, session_id: SessionId) -> Self {
        let mut tagged = self.clone();
        tagged.direction = Some(direction);
        tagged.session_id = Some(session_id);
        tagged
    }
}

/// Audit trail entry written whenever the resolver discards one side of a
/// conflicting pair. The losing change record itself is retained in the
/// change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// Type of the conflicted entity.
    pub record_type: RecordType,
    /// Entity identifier.
    pub record_id: String,
    /// Tick of the winning change.
    pub winning_tick: Tick,
    /// Tick of the losing change.
    pub losing_tick: Tick,
    /// When the conflict was resolved (epoch millis); audit metadata only.
    pub resolved_at: u64,
}
