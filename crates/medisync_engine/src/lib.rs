//! # MediSync Engine
//!
//! Sync session state machine, batching and retry for MediSync.
//!
//! This crate drives the initiating side of a bounded push/pull exchange:
//!
//! 1. `created` — session row allocated from the node's dedicated counter
//! 2. `authenticating` — device challenge handshake
//! 3. `negotiating` — both sides agree the exchange window start
//! 4. `pushing` — local changes planned into batches, each acknowledged
//!    individually
//! 5. `pulling` — inbound batches conflict-resolved and applied atomically
//!    per batch
//! 6. `committing` — the peer bookmark advances and the session completes
//!    at a single durable commit point
//!
//! ## Key invariants
//!
//! - At most one non-terminal session per peer; concurrent attempts fail
//!   fast
//! - `lastSyncedTick[peer]` only ever advances, and only at the commit
//!   point
//! - Batch application is idempotent: replays are no-ops detected by batch
//!   status (and by record identity across session restarts)
//! - Transport calls are the only suspension points; each is retried under
//!   the backoff policy, except authentication failures, which never are

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batcher;
mod config;
mod error;
mod retry;
mod session;
mod transport;

pub use batcher::Batcher;
pub use config::{BackoffPolicy, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use retry::with_backoff;
pub use session::{
    load_or_generate_credential, SessionOutcome, SessionRecord, SessionRunner, SessionStatus,
    SessionStore,
};
pub use transport::{MockTransport, SyncTransport};
