//! The sync session state machine.
//!
//! One [`SessionRunner`] drives bounded push/pull exchanges against a
//! single peer: authenticate, negotiate the window, push local changes in
//! acknowledged batches, pull and conflict-resolve the peer's changes, and
//! commit the peer bookmark at a single durable commit point. Sessions to
//! the same peer are serialized; a second attempt while one is running
//! fails fast.

use crate::batcher::Batcher;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::retry::with_backoff;
use crate::transport::SyncTransport;
use medisync_core::{
    last_synced_tick_key, now_millis, ChangeLog, DeviceId, FactStore, NodeTier, SessionId, Tick,
    FACT_DEVICE_SIGNING_KEY, FACT_SESSION_SEQUENCE,
};
use medisync_protocol::{
    plan_batches, resolve, BatchEnvelope, BatchStatus, CompleteRequest, DeviceCredential,
    SessionRequest, Winner,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle status of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Row allocated, nothing exchanged yet.
    Created,
    /// Device handshake in progress.
    Authenticating,
    /// Agreeing the exchange window with the peer.
    Negotiating,
    /// Transferring local changes to the peer.
    Pushing,
    /// Receiving and applying the peer's changes.
    Pulling,
    /// Fixing the end tick and advancing the bookmark.
    Committing,
    /// Fully committed.
    Completed,
    /// Failed; not retried automatically.
    Errored,
    /// Cancelled or interrupted before the commit point.
    Abandoned,
}

impl SessionStatus {
    /// True once the session can make no further progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Errored | SessionStatus::Abandoned
        )
    }

    /// Whether a transition from `self` to `next` is legal.
    #[must_use]
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, SessionStatus::Errored | SessionStatus::Abandoned) {
            return true;
        }
        matches!(
            (self, next),
            (SessionStatus::Created, SessionStatus::Authenticating)
                | (SessionStatus::Authenticating, SessionStatus::Negotiating)
                | (SessionStatus::Negotiating, SessionStatus::Pushing)
                | (SessionStatus::Pushing, SessionStatus::Pulling)
                | (SessionStatus::Pulling, SessionStatus::Committing)
                | (SessionStatus::Committing, SessionStatus::Completed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Created => "created",
            SessionStatus::Authenticating => "authenticating",
            SessionStatus::Negotiating => "negotiating",
            SessionStatus::Pushing => "pushing",
            SessionStatus::Pulling => "pulling",
            SessionStatus::Committing => "committing",
            SessionStatus::Completed => "completed",
            SessionStatus::Errored => "errored",
            SessionStatus::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// One session row, as surfaced to callers and tests.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// The session id, from this node's dedicated counter.
    pub session_id: SessionId,
    /// The peer being synced with.
    pub peer: DeviceId,
    /// Negotiated window start.
    pub start_tick: Tick,
    /// Highest tick observed, fixed at commit.
    pub end_tick: Option<Tick>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Creation time (epoch millis).
    pub created_at: u64,
    /// Completion time (epoch millis), once terminal.
    pub completed_at: Option<u64>,
    /// Failure reason, if errored.
    pub error_message: Option<String>,
}

/// Result of one session, surfaced upward.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Both directions committed; the bookmark advanced to this tick.
    Completed(Tick),
    /// The session failed; retry is the caller's decision, as a new
    /// session on its own cadence.
    Errored(String),
    /// Cancelled or interrupted; durable batches remain for reuse.
    Abandoned,
}

/// In-memory registry of session rows, enforcing at most one non-terminal
/// session per peer.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    records: Vec<SessionRecord>,
    active: HashMap<DeviceId, usize>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session for `peer`.
    ///
    /// # Errors
    ///
    /// [`EngineError::SessionInProgress`] if a non-terminal session for
    /// that peer already exists.
    pub fn begin(&self, session_id: SessionId, peer: DeviceId) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        if inner.active.contains_key(&peer) {
            return Err(EngineError::SessionInProgress { peer });
        }
        let record = SessionRecord {
            session_id,
            peer,
            start_tick: Tick::ZERO,
            end_tick: None,
            status: SessionStatus::Created,
            created_at: now_millis(),
            completed_at: None,
            error_message: None,
        };
        inner.records.push(record);
        let index = inner.records.len() - 1;
        inner.active.insert(peer, index);
        Ok(())
    }

    /// Moves a session to a new (non-terminal) status.
    pub fn transition(&self, session_id: SessionId, next: SessionStatus) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        let record = inner
            .records
            .iter_mut()
            .find(|record| record.session_id == session_id)
            .ok_or_else(|| EngineError::InvalidTransition {
                from: "missing".into(),
                to: next.to_string(),
            })?;
        if !record.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: record.status.to_string(),
                to: next.to_string(),
            });
        }
        record.status = next;
        Ok(())
    }

    /// Stores the negotiated window start.
    pub fn set_start_tick(&self, session_id: SessionId, start_tick: Tick) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner
            .records
            .iter_mut()
            .find(|record| record.session_id == session_id)
        {
            record.start_tick = start_tick;
        }
    }

    /// Marks a session completed with its end tick.
    pub fn complete(&self, session_id: SessionId, end_tick: Tick) {
        self.finish(session_id, SessionStatus::Completed, Some(end_tick), None);
    }

    /// Marks a session errored with a reason.
    pub fn fail(&self, session_id: SessionId, message: &str) {
        self.finish(
            session_id,
            SessionStatus::Errored,
            None,
            Some(message.to_string()),
        );
    }

    /// Marks a session abandoned.
    pub fn abandon(&self, session_id: SessionId) {
        self.finish(session_id, SessionStatus::Abandoned, None, None);
    }

    fn finish(
        &self,
        session_id: SessionId,
        status: SessionStatus,
        end_tick: Option<Tick>,
        error_message: Option<String>,
    ) {
        let mut inner = self.inner.lock();
        let Some(index) = inner
            .records
            .iter()
            .position(|record| record.session_id == session_id)
        else {
            return;
        };
        let peer = {
            let record = &mut inner.records[index];
            record.status = status;
            record.end_tick = end_tick;
            record.error_message = error_message;
            record.completed_at = Some(now_millis());
            record.peer
        };
        if inner.active.get(&peer) == Some(&index) {
            inner.active.remove(&peer);
        }
    }

    /// A snapshot of one session row.
    pub fn get(&self, session_id: SessionId) -> Option<SessionRecord> {
        self.inner
            .lock()
            .records
            .iter()
            .find(|record| record.session_id == session_id)
            .cloned()
    }

    /// True if a non-terminal session exists for the peer.
    pub fn has_active(&self, peer: DeviceId) -> bool {
        self.inner.lock().active.contains_key(&peer)
    }

    /// Snapshot of all session rows, oldest first.
    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.inner.lock().records.clone()
    }
}

/// Drives sync sessions against one peer link.
///
/// A node runs one runner per peer link, each with its own blob store
/// root, so batch addresses from different links can never collide.
pub struct SessionRunner {
    config: EngineConfig,
    facts: Arc<dyn FactStore>,
    change_log: Arc<ChangeLog>,
    batcher: Batcher,
    transport: Arc<dyn SyncTransport>,
    sessions: SessionStore,
    credential: DeviceCredential,
    cancelled: AtomicBool,
}

/// Loads the device signing credential from the fact store, generating and
/// persisting a fresh one on first use.
pub fn load_or_generate_credential(facts: &dyn FactStore) -> EngineResult<DeviceCredential> {
    match facts.get(FACT_DEVICE_SIGNING_KEY).map_err(EngineError::from)? {
        Some(encoded) => Ok(DeviceCredential::from_hex(&encoded)?),
        None => {
            let credential = DeviceCredential::generate();
            facts
                .set(FACT_DEVICE_SIGNING_KEY, &credential.to_hex())
                .map_err(EngineError::from)?;
            Ok(credential)
        }
    }
}

impl SessionRunner {
    /// Creates a runner; the device credential is loaded from (or created
    /// in) the fact store.
    pub fn new(
        config: EngineConfig,
        facts: Arc<dyn FactStore>,
        change_log: Arc<ChangeLog>,
        batcher: Batcher,
        transport: Arc<dyn SyncTransport>,
    ) -> EngineResult<Self> {
        let credential = load_or_generate_credential(facts.as_ref())?;
        Ok(Self {
            config,
            facts,
            change_log,
            batcher,
            transport,
            sessions: SessionStore::new(),
            credential,
            cancelled: AtomicBool::new(false),
        })
    }

    /// The session registry, for inspection.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The device credential's public half, for registration with peers.
    pub fn verifying_key(&self) -> medisync_protocol::VerifyingKey {
        self.credential.verifying_key()
    }

    /// Requests cancellation of the session in flight; takes effect at the
    /// next suspension point, leaving durable batches intact.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> EngineResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The last fully-committed tick for a peer.
    pub fn bookmark(&self, peer: DeviceId) -> EngineResult<Tick> {
        Ok(self
            .facts
            .get_tick(&last_synced_tick_key(&peer))
            .map_err(EngineError::from)?
            .unwrap_or(Tick::ZERO))
    }

    /// Runs one full sync session against `peer` (tier `peer_tier`).
    ///
    /// Returns the session outcome; the only error surfaced as `Err` is
    /// the fail-fast "session already in progress" precondition.
    pub fn run_sync(&self, peer: DeviceId, peer_tier: NodeTier) -> EngineResult<SessionOutcome> {
        self.cancelled.store(false, Ordering::SeqCst);

        let session_id = SessionId::new(
            self.facts
                .increment(FACT_SESSION_SEQUENCE, 1)
                .map_err(EngineError::from)?,
        );
        self.sessions.begin(session_id, peer)?;
        tracing::info!(%session_id, %peer, "session started");

        match self.drive(session_id, peer, peer_tier) {
            Ok(end_tick) => {
                self.sessions.complete(session_id, end_tick);
                tracing::info!(%session_id, %end_tick, "session completed");
                Ok(SessionOutcome::Completed(end_tick))
            }
            Err(EngineError::Cancelled) => {
                self.sessions.abandon(session_id);
                let _ = self.transport.abort(peer, session_id, "cancelled");
                tracing::warn!(%session_id, "session abandoned");
                Ok(SessionOutcome::Abandoned)
            }
            Err(error) => {
                let message = error.to_string();
                self.sessions.fail(session_id, &message);
                let _ = self.transport.abort(peer, session_id, &message);
                tracing::error!(%session_id, %message, "session errored");
                Ok(SessionOutcome::Errored(message))
            }
        }
    }

    fn drive(
        &self,
        session_id: SessionId,
        peer: DeviceId,
        peer_tier: NodeTier,
    ) -> EngineResult<Tick> {
        let backoff = self.config.backoff.clone();

        // authenticate
        self.sessions
            .transition(session_id, SessionStatus::Authenticating)?;
        if self.config.require_auth {
            let challenge =
                with_backoff(&backoff, "challenge", || self.transport.challenge(peer))?;
            let signature = self.credential.sign(&challenge);
            let accepted = with_backoff(&backoff, "verify", || {
                self.transport.verify(peer, &challenge, &signature)
            })?;
            if !accepted {
                return Err(EngineError::Authentication(
                    "peer rejected challenge signature".into(),
                ));
            }
        }
        self.check_cancelled()?;

        // negotiate the exchange window
        self.sessions
            .transition(session_id, SessionStatus::Negotiating)?;
        let bookmark = self.bookmark(peer)?;
        let request =
            SessionRequest::new(session_id, self.config.device_id, self.config.tier, bookmark);
        let grant = with_backoff(&backoff, "negotiate", || {
            self.transport.negotiate(peer, &request)
        })?;
        if grant.session_id != session_id {
            return Err(EngineError::Integrity(format!(
                "peer granted {} for proposed {}",
                grant.session_id, session_id
            )));
        }
        // start_tick is max(both bookmarks); anything lower means the peer
        // has regressed behind what we already committed for it
        if grant.start_tick < bookmark {
            return Err(EngineError::ClockRegression {
                reported: grant.start_tick,
                committed: bookmark,
            });
        }
        let start_tick = grant.start_tick;
        self.sessions.set_start_tick(session_id, start_tick);
        self.change_log
            .clock()
            .advance_to(grant.session_tick)
            .map_err(EngineError::from)?;
        self.check_cancelled()?;

        // push
        self.sessions.transition(session_id, SessionStatus::Pushing)?;
        let outgoing = self.change_log.snapshot_outgoing(start_tick, session_id);
        let mut highest_tick = grant.session_tick;
        for record in &outgoing {
            highest_tick = highest_tick.max(record.tick);
        }
        tracing::debug!(%session_id, total = outgoing.len(), "pushing outgoing changes");

        let envelopes = self
            .batcher
            .stage(plan_batches(session_id, &outgoing, self.config.max_batch_size))?;
        for envelope in &envelopes {
            self.check_cancelled()?;
            if self.batcher.is_acknowledged(envelope.address) {
                continue;
            }
            self.batcher.mark(envelope.address, BatchStatus::Sent);
            let ack = with_backoff(&backoff, "send_batch", || {
                self.transport.send_batch(peer, envelope)
            })?;
            if ack.address != envelope.address {
                return Err(EngineError::Integrity(format!(
                    "peer acknowledged {} for sent {}",
                    ack.address, envelope.address
                )));
            }
            self.batcher
                .mark(envelope.address, BatchStatus::Acknowledged);
        }

        // pull
        self.sessions.transition(session_id, SessionStatus::Pulling)?;
        let mut total_pulled = 0usize;
        loop {
            self.check_cancelled()?;
            let Some(envelope) = with_backoff(&backoff, "receive_next_batch", || {
                self.transport.receive_next_batch(peer, session_id)
            })?
            else {
                break;
            };
            envelope.validate()?;
            if self.batcher.is_applied(envelope.address) {
                continue;
            }
            self.batcher.store_incoming(&envelope)?;
            let batch_highest = self.apply_batch(&envelope, session_id, start_tick, peer_tier)?;
            highest_tick = highest_tick.max(batch_highest);
            total_pulled += envelope.records.len();
            self.batcher.mark(envelope.address, BatchStatus::Applied);
        }
        tracing::debug!(%session_id, total_pulled, "pull phase finished");

        // commit: the bookmark write is the single durable commit point; a
        // crash before it leaves the session abandoned and fully retryable
        self.sessions
            .transition(session_id, SessionStatus::Committing)?;
        let end_tick = highest_tick;
        if end_tick > bookmark {
            self.facts
                .set_tick(&last_synced_tick_key(&peer), end_tick)
                .map_err(EngineError::from)?;
        }

        // informing the peer is best effort: our side is already durable,
        // and an unreachable peer will lapse the session on its own
        let complete = CompleteRequest {
            session_id,
            end_tick,
        };
        if let Err(error) = with_backoff(&backoff, "complete", || {
            self.transport.complete(peer, &complete)
        }) {
            tracing::warn!(%session_id, %error, "peer not informed of completion");
        } else {
            // committed on both sides; the staged batches are no longer
            // needed
            let _ = self.batcher.discard_session(session_id);
        }

        Ok(end_tick)
    }

    /// Applies one received batch: all records validated up front, then
    /// conflict-resolved and written, so a structurally bad batch changes
    /// nothing.
    fn apply_batch(
        &self,
        envelope: &BatchEnvelope,
        session_id: SessionId,
        start_tick: Tick,
        peer_tier: NodeTier,
    ) -> EngineResult<Tick> {
        for record in &envelope.records {
            if let Some(payload) = &record.payload {
                record.record_type.validate_payload(payload)?;
            } else if record.deleted_at.is_none() {
                return Err(EngineError::Integrity(format!(
                    "batch {} record '{}' has neither payload nor deletion",
                    envelope.address, record.record_id
                )));
            }
        }

        let mut highest = Tick::ZERO;
        for record in &envelope.records {
            highest = highest.max(record.tick);

            // a record already in the log is a replay of an interrupted
            // session; nothing to do
            if self
                .change_log
                .contains(record.record_type, &record.record_id, record.tick)
            {
                continue;
            }

            // an incoming record whose content already matches the live
            // view is an echo of our own earlier push, re-stamped upstream
            if let Some(latest) = self
                .change_log
                .latest_for(record.record_type, &record.record_id)
            {
                if latest.payload == record.payload {
                    continue;
                }
            }

            match self.change_log.competitor_since(
                record.record_type,
                &record.record_id,
                start_tick,
            ) {
                None => {
                    self.change_log
                        .apply_incoming(record, session_id, None, false)
                        .map_err(EngineError::from)?;
                }
                Some(local) => {
                    let resolution = resolve(record, peer_tier, &local, self.config.tier);
                    let incoming_wins = resolution.winner == Winner::Incoming;
                    self.change_log.record_conflict(resolution.conflict);
                    self.change_log
                        .apply_incoming(record, session_id, None, incoming_wins)
                        .map_err(EngineError::from)?;
                }
            }
        }
        Ok(highest)
    }
}
