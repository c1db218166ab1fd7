//! # MediSync Protocol
//!
//! Wire messages, batch planning, conflict policy and the device handshake
//! for MediSync.
//!
//! Everything in this crate is deterministic and side-effect free (the one
//! exception being challenge/credential generation, which draws from the
//! OS RNG): both peers in a session run the same planning and the same
//! resolution policy over the same inputs and must reach the same result.
//!
//! - [`plan_batches`]: deterministic partitioning of a change set
//! - [`resolve`]: last-writer-wins by tick with the tier tie-break
//! - [`sign_challenge`] / [`verify_challenge`]: the device handshake as
//!   pure functions over credential and challenge bytes
//! - [`BatchEnvelope`] and friends: the JSON wire format

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod batch;
mod conflict;
mod error;
mod messages;

pub use auth::{
    sign_challenge, verify_challenge, Challenge, ChallengeSignature, DeviceCredential,
    CHALLENGE_NONCE_LEN,
};
pub use ed25519_dalek::{SigningKey, VerifyingKey};
pub use batch::{plan_batches, BatchStatus, PlannedBatch};
pub use conflict::{resolve, Resolution, Winner};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    decode, encode, BatchAck, BatchEnvelope, CompleteRequest, SessionGrant, SessionRequest,
    PROTOCOL_VERSION,
};
