//! # MediSync Server
//!
//! Central-side sync responder for MediSync.
//!
//! This crate is the responder half of the session protocol, the logic a
//! route layer delegates to:
//! - [`DeviceRegistry`]: device enrolment and the challenge handshake
//! - [`CentralHandler`]: session grants, idempotent push persistence,
//!   pull snapshots with echo suppression, and the per-peer bookmark
//!   commit
//!
//! The responder uses the same `medisync_core` change log and fact store
//! as every other tier; pushed records are re-stamped onto the central
//! tick sequence so they become visible to all other peers' bookmarks.
//! No listener lives here: exposing these methods over HTTP (and the
//! schema, UI and report layers above them) is out of scope for the
//! engine.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod error;
mod handler;

pub use auth::DeviceRegistry;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{CentralHandler, ResponderSession, ResponderStatus};
