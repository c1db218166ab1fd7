//! Device registry and challenge verification.

use crate::error::{ServerError, ServerResult};
use medisync_core::{now_millis, DeviceId};
use medisync_protocol::{verify_challenge, Challenge, ChallengeSignature, VerifyingKey};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Registered devices, outstanding challenges and recent authentications.
///
/// Registration of a device's verifying key is an explicit operation done
/// out of band (device enrolment); the engine never transmits secret
/// material. One challenge is outstanding per device at a time; verifying
/// consumes it, so a captured signature cannot be replayed.
pub struct DeviceRegistry {
    challenge_max_age_ms: u64,
    devices: RwLock<HashMap<DeviceId, VerifyingKey>>,
    challenges: RwLock<HashMap<DeviceId, Challenge>>,
    authenticated_at: RwLock<HashMap<DeviceId, u64>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(challenge_max_age_ms: u64) -> Self {
        Self {
            challenge_max_age_ms,
            devices: RwLock::new(HashMap::new()),
            challenges: RwLock::new(HashMap::new()),
            authenticated_at: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) a device's verifying key.
    pub fn register(&self, device: DeviceId, key: VerifyingKey) {
        tracing::info!(%device, "device registered");
        self.devices.write().insert(device, key);
    }

    /// True if the device has a registered key.
    pub fn is_registered(&self, device: &DeviceId) -> bool {
        self.devices.read().contains_key(device)
    }

    /// Issues a challenge for a registered device.
    ///
    /// # Errors
    ///
    /// [`ServerError::AuthenticationFailed`] for an unknown device.
    pub fn issue_challenge(&self, device: DeviceId) -> ServerResult<Challenge> {
        if !self.is_registered(&device) {
            return Err(ServerError::AuthenticationFailed(format!(
                "unknown device {device}"
            )));
        }
        let challenge = Challenge::issue();
        self.challenges.write().insert(device, challenge.clone());
        Ok(challenge)
    }

    /// Verifies a signed challenge, consuming it on success and marking
    /// the device authenticated.
    ///
    /// # Errors
    ///
    /// [`ServerError::AuthenticationFailed`] for an unknown device, a
    /// challenge that was never issued or has expired, or a bad signature.
    pub fn verify(
        &self,
        device: DeviceId,
        challenge: &Challenge,
        signature: &ChallengeSignature,
    ) -> ServerResult<()> {
        let key = *self.devices.read().get(&device).ok_or_else(|| {
            ServerError::AuthenticationFailed(format!("unknown device {device}"))
        })?;

        let issued = self.challenges.read().get(&device).cloned();
        let Some(issued) = issued else {
            return Err(ServerError::AuthenticationFailed(
                "no challenge outstanding".into(),
            ));
        };
        if issued.nonce != challenge.nonce {
            return Err(ServerError::AuthenticationFailed(
                "challenge does not match the one issued".into(),
            ));
        }
        if issued.is_expired(self.challenge_max_age_ms) {
            self.challenges.write().remove(&device);
            return Err(ServerError::AuthenticationFailed("challenge expired".into()));
        }
        if !verify_challenge(&key, &issued.nonce, &signature.bytes) {
            return Err(ServerError::AuthenticationFailed(
                "challenge signature invalid".into(),
            ));
        }

        self.challenges.write().remove(&device);
        self.authenticated_at.write().insert(device, now_millis());
        Ok(())
    }

    /// Consumes a recent successful authentication for session start.
    pub fn take_authenticated(&self, device: &DeviceId) -> bool {
        self.authenticated_at.write().remove(device).is_some()
    }
}
