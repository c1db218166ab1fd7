//! Error types for the sync responder.

use medisync_core::{CoreError, DeviceId, SessionId, Tick};
use medisync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for responder operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur handling a peer's sync session.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The device handshake failed (bad signature, unknown device,
    /// expired challenge). Aborts the session before any data moves.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The responder is at its concurrent-session capacity; the peer
    /// should retry later.
    #[error("sync capacity full, retry later")]
    Busy,

    /// A non-terminal session for this peer already exists.
    #[error("session already in progress for {peer}")]
    SessionInProgress {
        /// The busy peer.
        peer: DeviceId,
    },

    /// No such session, or it is not active.
    #[error("unknown or inactive session {session_id} for {peer}")]
    SessionNotFound {
        /// The peer the lookup was for.
        peer: DeviceId,
        /// The missing session.
        session_id: SessionId,
    },

    /// The session lapsed or previously errored.
    #[error("session {session_id} errored: {message}")]
    SessionErrored {
        /// The session.
        session_id: SessionId,
        /// Stored failure reason.
        message: String,
    },

    /// The peer speaks a different protocol version.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    ProtocolMismatch {
        /// Version spoken here.
        local: u16,
        /// Version the peer requested.
        remote: u16,
    },

    /// The peer reported a bookmark behind what it already committed.
    #[error("clock regression: peer reported {reported}, already committed {committed}")]
    ClockRegression {
        /// The tick the peer reported.
        reported: Tick,
        /// The tick already durably committed for that peer.
        committed: Tick,
    },

    /// A batch or record failed structural validation.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Core error not covered by a more specific variant.
    #[error("core error: {0}")]
    Core(CoreError),
}

impl ServerError {
    /// True if the fault lies with the requesting peer.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::AuthenticationFailed(_)
                | ServerError::SessionInProgress { .. }
                | ServerError::SessionNotFound { .. }
                | ServerError::ProtocolMismatch { .. }
                | ServerError::ClockRegression { .. }
                | ServerError::Integrity(_)
        )
    }

    /// True if the peer should simply retry later.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, ServerError::Busy)
    }
}

impl From<CoreError> for ServerError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::ClockRegression { reported, committed } => {
                ServerError::ClockRegression { reported, committed }
            }
            CoreError::IntegrityViolation { message } => ServerError::Integrity(message),
            other => ServerError::Core(other),
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(error: ProtocolError) -> Self {
        ServerError::Integrity(error.to_string())
    }
}
