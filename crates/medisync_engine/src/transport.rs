//! Transport layer abstraction for sync sessions.

use crate::error::{EngineError, EngineResult};
use medisync_core::{DeviceId, SessionId};
use medisync_protocol::{
    BatchAck, BatchEnvelope, Challenge, ChallengeSignature, CompleteRequest, SessionGrant,
    SessionRequest,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

/// Network operations a sync session needs from its collaborator.
///
/// The engine is transport-agnostic: implementations may speak HTTP, a
/// message queue, or run in-process for tests. Batches are byte-opaque to
/// the transport; every method is a suspension point wrapped in the
/// engine's retry policy.
pub trait SyncTransport: Send + Sync {
    /// Requests an authentication challenge from the peer.
    fn challenge(&self, peer: DeviceId) -> EngineResult<Challenge>;

    /// Submits the signed challenge; `Ok(false)` means the peer rejected
    /// the signature (an authentication failure, not a transport one).
    fn verify(
        &self,
        peer: DeviceId,
        challenge: &Challenge,
        signature: &ChallengeSignature,
    ) -> EngineResult<bool>;

    /// Proposes a session and negotiates the exchange window.
    fn negotiate(&self, peer: DeviceId, request: &SessionRequest) -> EngineResult<SessionGrant>;

    /// Transfers one outgoing batch; the returned ack names the batch the
    /// peer durably received.
    fn send_batch(&self, peer: DeviceId, envelope: &BatchEnvelope) -> EngineResult<BatchAck>;

    /// Fetches the next inbound batch, or `None` once the peer has no more
    /// for this session.
    fn receive_next_batch(
        &self,
        peer: DeviceId,
        session_id: SessionId,
    ) -> EngineResult<Option<BatchEnvelope>>;

    /// Reports a committed session to the peer.
    fn complete(&self, peer: DeviceId, request: &CompleteRequest) -> EngineResult<()>;

    /// Reports an errored or abandoned session to the peer (best effort).
    fn abort(&self, peer: DeviceId, session_id: SessionId, reason: &str) -> EngineResult<()>;
}

/// A scripted transport for engine unit tests.
#[derive(Default)]
pub struct MockTransport {
    grant: Mutex<Option<SessionGrant>>,
    verify_result: Mutex<Option<bool>>,
    pull_queue: Mutex<VecDeque<BatchEnvelope>>,
    sent: Mutex<Vec<BatchEnvelope>>,
    completions: Mutex<Vec<CompleteRequest>>,
    aborts: Mutex<Vec<(SessionId, String)>>,
    /// Calls left to fail with a retryable timeout; `u32::MAX` means fail
    /// forever.
    failures_remaining: AtomicU32,
}

impl MockTransport {
    /// Creates a mock that verifies every signature and grants nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the session grant.
    pub fn set_grant(&self, grant: SessionGrant) {
        *self.grant.lock() = Some(grant);
    }

    /// Scripts the verification outcome (defaults to accept).
    pub fn set_verify_result(&self, accept: bool) {
        *self.verify_result.lock() = Some(accept);
    }

    /// Queues a batch to be served by `receive_next_batch`.
    pub fn queue_pull_batch(&self, envelope: BatchEnvelope) {
        self.pull_queue.lock().push_back(envelope);
    }

    /// Makes the next `count` transport calls fail with a retryable
    /// timeout.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Makes every transport call fail with a retryable timeout.
    pub fn always_timeout(&self) {
        self.fail_next(u32::MAX);
    }

    /// Batches the engine sent.
    pub fn sent(&self) -> Vec<BatchEnvelope> {
        self.sent.lock().clone()
    }

    /// Complete requests the engine delivered.
    pub fn completions(&self) -> Vec<CompleteRequest> {
        self.completions.lock().clone()
    }

    /// Abort notices the engine delivered.
    pub fn aborts(&self) -> Vec<(SessionId, String)> {
        self.aborts.lock().clone()
    }

    fn check_failure(&self) -> EngineResult<()> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(());
        }
        if remaining != u32::MAX {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
        }
        Err(EngineError::transport_retryable("mock timeout"))
    }
}

impl SyncTransport for MockTransport {
    fn challenge(&self, _peer: DeviceId) -> EngineResult<Challenge> {
        self.check_failure()?;
        Ok(Challenge::issue())
    }

    fn verify(
        &self,
        _peer: DeviceId,
        _challenge: &Challenge,
        _signature: &ChallengeSignature,
    ) -> EngineResult<bool> {
        self.check_failure()?;
        Ok(self.verify_result.lock().unwrap_or(true))
    }

    fn negotiate(&self, _peer: DeviceId, request: &SessionRequest) -> EngineResult<SessionGrant> {
        self.check_failure()?;
        let scripted = *self.grant.lock();
        let mut grant = scripted.ok_or_else(|| EngineError::transport_fatal("no mock grant set"))?;
        // scripted grants with a zero id echo the proposed one
        if grant.session_id == SessionId::default() {
            grant.session_id = request.session_id;
        }
        Ok(grant)
    }

    fn send_batch(&self, _peer: DeviceId, envelope: &BatchEnvelope) -> EngineResult<BatchAck> {
        self.check_failure()?;
        self.sent.lock().push(envelope.clone());
        Ok(BatchAck {
            address: envelope.address,
        })
    }

    fn receive_next_batch(
        &self,
        _peer: DeviceId,
        _session_id: SessionId,
    ) -> EngineResult<Option<BatchEnvelope>> {
        self.check_failure()?;
        Ok(self.pull_queue.lock().pop_front())
    }

    fn complete(&self, _peer: DeviceId, request: &CompleteRequest) -> EngineResult<()> {
        self.check_failure()?;
        self.completions.lock().push(*request);
        Ok(())
    }

    fn abort(&self, _peer: DeviceId, session_id: SessionId, reason: &str) -> EngineResult<()> {
        self.aborts.lock().push((session_id, reason.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medisync_core::{NodeTier, Tick};

    #[test]
    fn unscripted_negotiate_is_fatal() {
        let transport = MockTransport::new();
        let request = SessionRequest::new(
            SessionId::new(1),
            DeviceId::generate(),
            NodeTier::Facility,
            Tick::ZERO,
        );
        let result = transport.negotiate(DeviceId::generate(), &request);
        assert!(matches!(
            result,
            Err(EngineError::Transport { retryable: false, .. })
        ));
    }

    #[test]
    fn fail_next_counts_down() {
        let transport = MockTransport::new();
        transport.fail_next(2);

        let peer = DeviceId::generate();
        assert!(transport.challenge(peer).is_err());
        assert!(transport.challenge(peer).is_err());
        assert!(transport.challenge(peer).is_ok());
    }

    #[test]
    fn verify_defaults_to_accept() {
        let transport = MockTransport::new();
        let credential = medisync_protocol::DeviceCredential::generate();
        let challenge = Challenge::issue();
        let signature = credential.sign(&challenge);

        let peer = DeviceId::generate();
        assert!(transport.verify(peer, &challenge, &signature).unwrap());

        transport.set_verify_result(false);
        assert!(!transport.verify(peer, &challenge, &signature).unwrap());
    }
}
