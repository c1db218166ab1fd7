//! Configuration for the sync engine.
//!
//! All configuration is passed explicitly at construction; there is no
//! ambient or global lookup.

use medisync_core::{DeviceId, NodeTier};
use std::time::Duration;

/// Backoff policy for transient transport failures.
///
/// The delay before retry attempt *n* (1-indexed) is
/// `multiplier_ms * 2^(n-1)`, capped at `max_wait_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts per call, including the first (always at least 1).
    pub max_attempts: u32,
    /// Base delay unit in milliseconds.
    pub multiplier_ms: u64,
    /// Ceiling on any single delay, in milliseconds.
    pub max_wait_ms: u64,
}

impl BackoffPolicy {
    /// Creates a backoff policy; `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, multiplier_ms: u64, max_wait_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            multiplier_ms,
            max_wait_ms,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, 0, 0)
    }

    /// Delay to wait before retry attempt `attempt` (1-indexed; the first
    /// retry is attempt 1).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.multiplier_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(63);
        let delay = self
            .multiplier_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_wait_ms);
        Duration::from_millis(delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3, 500, 10_000)
    }
}

/// Configuration for one node's sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// This node's device identity.
    pub device_id: DeviceId,
    /// This node's tier in the deployment hierarchy.
    pub tier: NodeTier,
    /// Maximum records per batch.
    pub max_batch_size: usize,
    /// Whether the handshake is required before a session may exchange
    /// data.
    pub require_auth: bool,
    /// Backoff policy for transport calls.
    pub backoff: BackoffPolicy,
}

impl EngineConfig {
    /// Creates a configuration with defaults for everything but identity.
    #[must_use]
    pub fn new(device_id: DeviceId, tier: NodeTier) -> Self {
        Self {
            device_id,
            tier,
            max_batch_size: 100,
            require_auth: true,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Sets the maximum batch size.
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

    /// Sets the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = BackoffPolicy::new(5, 100, 1000);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
        // capped
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(1000));
    }

    #[test]
    fn zero_attempts_clamps_to_one() {
        assert_eq!(BackoffPolicy::new(0, 100, 1000).max_attempts, 1);
    }

    #[test]
    fn no_retry_policy() {
        let policy = BackoffPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn large_attempt_does_not_overflow() {
        let policy = BackoffPolicy::new(100, u64::MAX / 2, u64::MAX);
        let _ = policy.delay_for_attempt(90);
    }

    #[test]
    fn config_builder() {
        let config = EngineConfig::new(DeviceId::generate(), NodeTier::Facility)
            .with_max_batch_size(25)
            .with_require_auth(false)
            .with_backoff(BackoffPolicy::new(2, 50, 200));

        assert_eq!(config.max_batch_size, 25);
        assert!(!config.require_auth);
        assert_eq!(config.backoff.max_attempts, 2);
    }
}
