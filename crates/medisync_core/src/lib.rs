//! # MediSync Core
//!
//! Logical clock, change log and node-local facts for MediSync.
//!
//! This crate holds the pieces of the synchronization engine that live on
//! every node regardless of tier:
//! - [`LogicalClock`]: durable, monotonic tick allocation
//! - [`ChangeLog`]: tick-stamped mutation capture with tombstones and the
//!   conflict audit trail
//! - [`FactStore`]: restart-surviving key-value facts (bookmarks, sequences,
//!   the device credential)
//! - The record model: a closed set of [`RecordType`]s, each with a
//!   structural schema validated at the change-log boundary
//!
//! ## Key invariants
//!
//! - A tick is durably persisted before it is issued; a failed persist
//!   fails the mutation rather than reusing a tick
//! - Within one node's log, ticks are monotonic; `advance_to` never moves
//!   the clock backward
//! - Deletes are tombstones and losing conflict sides are retained; the
//!   log never physically removes a record
//!
//! The rest of the system builds on these: the protocol crate plans and
//! resolves, the engine drives sessions, the server responds to them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_log;
mod clock;
mod error;
mod facts;
mod record;
mod types;

pub use change_log::ChangeLog;
pub use clock::LogicalClock;
pub use error::{CoreError, CoreResult};
pub use facts::{
    last_synced_tick_key, FactStore, FileFactStore, MemoryFactStore, FACT_CURRENT_TICK,
    FACT_DEVICE_SIGNING_KEY, FACT_SESSION_SEQUENCE,
};
pub use record::{ChangeRecord, ConflictRecord, Mutation, RecordType};
pub use types::{now_millis, BatchAddress, DeviceId, Direction, NodeTier, SessionId, Tick};
