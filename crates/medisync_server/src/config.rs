//! Responder configuration.

use medisync_core::{DeviceId, NodeTier};

/// Configuration for the central-side sync responder.
///
/// Passed explicitly at construction; no ambient lookup. The route layer
/// that exposes the responder over a network owns listener concerns
/// (addresses, TLS, timeouts per request).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// This node's device identity.
    pub device_id: DeviceId,
    /// This node's tier (normally [`NodeTier::Central`]).
    pub tier: NodeTier,
    /// Maximum concurrent non-terminal sessions across all peers.
    pub max_concurrent_sessions: usize,
    /// Idle time after which a non-terminal session is lapsed, in
    /// milliseconds.
    pub session_timeout_ms: u64,
    /// Maximum records per served batch.
    pub max_batch_size: usize,
    /// Whether the device handshake is required before a session.
    pub require_auth: bool,
    /// Maximum age of an issued challenge, in milliseconds.
    pub challenge_max_age_ms: u64,
}

impl ServerConfig {
    /// Creates a configuration with defaults for everything but identity.
    #[must_use]
    pub fn new(device_id: DeviceId, tier: NodeTier) -> Self {
        Self {
            device_id,
            tier,
            max_concurrent_sessions: 4,
            session_timeout_ms: 10 * 60 * 1000,
            max_batch_size: 100,
            require_auth: true,
            challenge_max_age_ms: 60 * 1000,
        }
    }

    /// Sets the concurrent-session capacity.
    #[must_use]
    pub fn with_max_concurrent_sessions(mut self, max: usize) -> Self {
        self.max_concurrent_sessions = max;
        self
    }

    /// Sets the idle session timeout.
    #[must_use]
    pub fn with_session_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.session_timeout_ms = timeout_ms;
        self
    }

    /// Sets the maximum served batch size.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Enables or disables the authentication handshake.
    #[must_use]
    pub fn with_require_auth(mut self, require: bool) -> Self {
        self.require_auth = require;
        self
    }
}
