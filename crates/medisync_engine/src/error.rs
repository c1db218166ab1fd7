//! Error types for the sync engine.

use medisync_core::{CoreError, DeviceId, Tick};
use medisync_protocol::ProtocolError;
use medisync_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while driving a sync session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The peer failed the device handshake.
    ///
    /// Fatal to the session and never retried by the engine; retrying an
    /// unauthenticated peer is the caller's policy decision.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A network call failed.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the call may be retried under the backoff policy.
        retryable: bool,
    },

    /// A batch or record failed structural validation on apply.
    ///
    /// Local to the batch but aborts the session; implies a protocol or
    /// data-corruption bug needing operator attention.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// A peer reported a tick lower than one already committed for it.
    #[error("clock regression: peer reported {reported}, already committed {committed}")]
    ClockRegression {
        /// The tick the peer reported.
        reported: Tick,
        /// The tick already durably committed for that peer.
        committed: Tick,
    },

    /// A non-terminal session to this peer already exists.
    #[error("session already in progress with {peer}")]
    SessionInProgress {
        /// The busy peer.
        peer: DeviceId,
    },

    /// An illegal session status transition was attempted.
    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Attempted target status.
        to: String,
    },

    /// The session was cancelled by the caller.
    #[error("sync cancelled")]
    Cancelled,

    /// Batch storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Core error not covered by a more specific variant.
    #[error("core error: {0}")]
    Core(CoreError),
}

impl EngineError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// True if this error may be retried under the backoff policy.
    ///
    /// Authentication failures are deliberately not retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transport { retryable: true, .. })
    }
}

// Lift the core taxonomy into the session-level one so callers see a single
// classification.
impl From<CoreError> for EngineError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::ClockRegression { reported, committed } => {
                EngineError::ClockRegression { reported, committed }
            }
            CoreError::IntegrityViolation { message } => EngineError::Integrity(message),
            other => EngineError::Core(other),
        }
    }
}

impl From<ProtocolError> for EngineError {
    fn from(error: ProtocolError) -> Self {
        EngineError::Integrity(error.to_string())
    }
}
