//! Device authentication handshake primitives.
//!
//! The verifying peer issues a random challenge; the proving peer signs it
//! with its device-local signing key (never transmitted) and returns the
//! signature; the verifier checks it against the verifying key registered
//! for that device. Signing and verification are pure functions over
//! credential and challenge bytes.

use crate::error::{ProtocolError, ProtocolResult};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use medisync_core::now_millis;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Size of a challenge nonce in bytes.
pub const CHALLENGE_NONCE_LEN: usize = 32;

/// A random challenge issued by the verifying peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// Random nonce the prover must sign.
    #[serde(with = "hex_bytes")]
    pub nonce: Vec<u8>,
    /// Issue time (epoch millis), for expiry checking.
    pub issued_at: u64,
}

impl Challenge {
    /// Issues a fresh random challenge.
    #[must_use]
    pub fn issue() -> Self {
        let mut nonce = vec![0u8; CHALLENGE_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        Self {
            nonce,
            issued_at: now_millis(),
        }
    }

    /// True if the challenge is older than `max_age_millis`.
    #[must_use]
    pub fn is_expired(&self, max_age_millis: u64) -> bool {
        now_millis().saturating_sub(self.issued_at) > max_age_millis
    }
}

/// The device-local signing credential.
///
/// The secret half never leaves the device; only [`DeviceCredential::verifying_key`]
/// is registered with peers.
pub struct DeviceCredential {
    signing_key: SigningKey,
}

impl DeviceCredential {
    /// Generates a fresh credential.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restores a credential from its hex-encoded secret bytes (the form
    /// stored in the local fact store).
    ///
    /// # Errors
    ///
    /// Returns an error if the hex is malformed or not 32 bytes.
    pub fn from_hex(encoded: &str) -> ProtocolResult<Self> {
        let bytes = hex::decode(encoded)
            .map_err(|e| ProtocolError::InvalidCredential(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ProtocolError::InvalidCredential("secret key must be 32 bytes".into()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }

    /// Hex-encodes the secret bytes for fact-store persistence.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// The public half, registered with the verifying peer.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Signs a challenge nonce.
    #[must_use]
    pub fn sign(&self, challenge: &Challenge) -> ChallengeSignature {
        ChallengeSignature {
            bytes: sign_challenge(&self.signing_key, &challenge.nonce).to_vec(),
        }
    }
}

/// A signature over a challenge nonce, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeSignature {
    /// Raw ed25519 signature bytes.
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

/// Signs challenge bytes with a credential. Pure function: no dependency
/// on any stored entity.
#[must_use]
pub fn sign_challenge(key: &SigningKey, challenge_bytes: &[u8]) -> [u8; 64] {
    key.sign(challenge_bytes).to_bytes()
}

/// Verifies a signature over challenge bytes against a registered
/// verifying key. Returns false for malformed signature material rather
/// than erroring; a bad signature and an unparseable one fail the
/// handshake the same way.
#[must_use]
pub fn verify_challenge(key: &VerifyingKey, challenge_bytes: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(challenge_bytes, &signature).is_ok()
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(serde::de::Error::custom)
    }
}
