//! The central-side session handler.
//!
//! `CentralHandler` is the responder half of the session protocol: it
//! grants sessions, persists pushed batches idempotently, snapshots and
//! serves outgoing batches for the pull phase, and commits the per-peer
//! bookmark when the initiator completes. A route layer exposes these
//! methods over a network; tests drive them in-process.

use crate::auth::DeviceRegistry;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use medisync_core::{
    last_synced_tick_key, now_millis, BatchAddress, ChangeLog, DeviceId, FactStore, NodeTier,
    SessionId, Tick,
};
use medisync_protocol::{
    plan_batches, resolve, BatchAck, BatchEnvelope, CompleteRequest, SessionGrant, SessionRequest,
    Winner, PROTOCOL_VERSION,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Responder-side status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderStatus {
    /// Exchanging data.
    Active,
    /// The initiator committed; our bookmark advanced.
    Completed,
    /// Failed or lapsed.
    Errored,
}

struct ServerSession {
    peer: DeviceId,
    peer_tier: NodeTier,
    start_tick: Tick,
    status: ResponderStatus,
    /// Outgoing batches, snapshotted lazily at the first pull request.
    outgoing: Option<VecDeque<BatchEnvelope>>,
    /// Batches already persisted; re-receiving one is an ack-only no-op.
    applied: HashSet<BatchAddress>,
    last_activity: u64,
    error_message: Option<String>,
}

/// A snapshot of one responder-side session, for inspection.
#[derive(Debug, Clone)]
pub struct ResponderSession {
    /// The session id (as proposed by the initiator).
    pub session_id: SessionId,
    /// The initiating peer.
    pub peer: DeviceId,
    /// Negotiated window start.
    pub start_tick: Tick,
    /// Current status.
    pub status: ResponderStatus,
    /// Failure reason, if errored.
    pub error_message: Option<String>,
}

/// The sync responder.
pub struct CentralHandler {
    config: ServerConfig,
    facts: Arc<dyn FactStore>,
    change_log: Arc<ChangeLog>,
    registry: DeviceRegistry,
    sessions: RwLock<HashMap<(DeviceId, SessionId), ServerSession>>,
}

impl CentralHandler {
    /// Creates a handler over this node's change log and fact store.
    pub fn new(config: ServerConfig, facts: Arc<dyn FactStore>, change_log: Arc<ChangeLog>) -> Self {
        let registry = DeviceRegistry::new(config.challenge_max_age_ms);
        Self {
            config,
            facts,
            change_log,
            registry,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The device registry (enrolment and handshake).
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// The change log this responder persists into.
    pub fn change_log(&self) -> &Arc<ChangeLog> {
        &self.change_log
    }

    /// This node's last committed tick for a peer.
    pub fn bookmark_for(&self, peer: DeviceId) -> ServerResult<Tick> {
        Ok(self
            .facts
            .get_tick(&last_synced_tick_key(&peer))
            .map_err(ServerError::from)?
            .unwrap_or(Tick::ZERO))
    }

    /// Number of active sessions across all peers.
    pub fn active_session_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|session| session.status == ResponderStatus::Active)
            .count()
    }

    /// Snapshot of one session, if known.
    pub fn session(&self, peer: DeviceId, session_id: SessionId) -> Option<ResponderSession> {
        self.sessions
            .read()
            .get(&(peer, session_id))
            .map(|session| ResponderSession {
                session_id,
                peer: session.peer,
                start_tick: session.start_tick,
                status: session.status,
                error_message: session.error_message.clone(),
            })
    }

    /// Grants a session to an authenticated peer.
    ///
    /// Lapses idle sessions first, enforces capacity and the one-session-
    /// per-peer rule, negotiates the window start as the max of both
    /// bookmarks, and reserves a fresh tick pair so neither the peer's
    /// session stamps nor central's own writes can collide.
    pub fn start_session(&self, request: &SessionRequest) -> ServerResult<SessionGrant> {
        if request.protocol_version != PROTOCOL_VERSION {
            return Err(ServerError::ProtocolMismatch {
                local: PROTOCOL_VERSION,
                remote: request.protocol_version,
            });
        }

        let peer = request.device_id;
        if self.config.require_auth && !self.registry.take_authenticated(&peer) {
            return Err(ServerError::AuthenticationFailed(
                "device handshake required before a session".into(),
            ));
        }

        let mut sessions = self.sessions.write();
        self.lapse_idle(&mut sessions);

        let active = sessions
            .values()
            .filter(|session| session.status == ResponderStatus::Active)
            .count();
        if active >= self.config.max_concurrent_sessions {
            return Err(ServerError::Busy);
        }
        if sessions
            .values()
            .any(|session| session.status == ResponderStatus::Active && session.peer == peer)
        {
            return Err(ServerError::SessionInProgress { peer });
        }

        let committed = self
            .facts
            .get_tick(&last_synced_tick_key(&peer))
            .map_err(ServerError::from)?
            .unwrap_or(Tick::ZERO);
        if request.last_synced_tick < committed {
            return Err(ServerError::ClockRegression {
                reported: request.last_synced_tick,
                committed,
            });
        }
        let start_tick = request.last_synced_tick.max(committed);

        let (session_tick, _tock) = self
            .change_log
            .clock()
            .tick_pair()
            .map_err(ServerError::from)?;

        sessions.insert(
            (peer, request.session_id),
            ServerSession {
                peer,
                peer_tier: request.tier,
                start_tick,
                status: ResponderStatus::Active,
                outgoing: None,
                applied: HashSet::new(),
                last_activity: now_millis(),
                error_message: None,
            },
        );

        tracing::info!(
            session_id = %request.session_id,
            %peer,
            %start_tick,
            %session_tick,
            "session granted"
        );

        Ok(SessionGrant {
            session_id: request.session_id,
            tier: self.config.tier,
            start_tick,
            session_tick,
        })
    }

    /// Persists one pushed batch and acknowledges it.
    ///
    /// Re-receiving an already-persisted batch returns the same ack
    /// without touching the change log.
    pub fn receive_batch(
        &self,
        peer: DeviceId,
        envelope: &BatchEnvelope,
    ) -> ServerResult<BatchAck> {
        envelope.validate().map_err(ServerError::from)?;
        let session_id = envelope.address.session_id;

        let (start_tick, peer_tier) = {
            let mut sessions = self.sessions.write();
            let session = self.active_session(&mut sessions, peer, session_id)?;
            if session.applied.contains(&envelope.address) {
                return Ok(BatchAck {
                    address: envelope.address,
                });
            }
            (session.start_tick, session.peer_tier)
        };

        self.persist_batch(envelope, session_id, start_tick, peer_tier)?;

        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(&(peer, session_id)) {
            session.applied.insert(envelope.address);
        }
        Ok(BatchAck {
            address: envelope.address,
        })
    }

    /// Serves the next outgoing batch for the pull phase, snapshotting the
    /// window at the first call; `None` once the session is drained.
    pub fn serve_next_batch(
        &self,
        peer: DeviceId,
        session_id: SessionId,
    ) -> ServerResult<Option<BatchEnvelope>> {
        let mut sessions = self.sessions.write();
        let session = self.active_session(&mut sessions, peer, session_id)?;

        if session.outgoing.is_none() {
            let snapshot = self.change_log.snapshot_outgoing(session.start_tick, session_id);
            let planned = plan_batches(session_id, &snapshot, self.config.max_batch_size);
            tracing::debug!(
                %session_id,
                records = snapshot.len(),
                batches = planned.len(),
                "pull snapshot taken"
            );
            session.outgoing = Some(planned.into_iter().map(BatchEnvelope::from_planned).collect());
        }

        Ok(session
            .outgoing
            .as_mut()
            .and_then(|batches| batches.pop_front()))
    }

    /// Commits a session: advances this node's bookmark for the peer (it
    /// only ever advances) and marks the session completed.
    pub fn complete_session(
        &self,
        peer: DeviceId,
        request: &CompleteRequest,
    ) -> ServerResult<()> {
        let mut sessions = self.sessions.write();
        let session = self.active_session(&mut sessions, peer, request.session_id)?;

        let key = last_synced_tick_key(&peer);
        let committed = self
            .facts
            .get_tick(&key)
            .map_err(ServerError::from)?
            .unwrap_or(Tick::ZERO);
        if request.end_tick > committed {
            self.facts
                .set_tick(&key, request.end_tick)
                .map_err(ServerError::from)?;
        }

        session.status = ResponderStatus::Completed;
        session.outgoing = None;
        tracing::info!(session_id = %request.session_id, %peer, end_tick = %request.end_tick, "session completed");
        Ok(())
    }

    /// Marks a session errored on the initiator's behalf (best effort; an
    /// unknown session is ignored).
    pub fn abort_session(&self, peer: DeviceId, session_id: SessionId, reason: &str) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(&(peer, session_id)) {
            if session.status == ResponderStatus::Active {
                session.status = ResponderStatus::Errored;
                session.error_message = Some(reason.to_string());
                session.outgoing = None;
                tracing::warn!(%session_id, %peer, reason, "session aborted by peer");
            }
        }
    }

    fn lapse_idle(&self, sessions: &mut HashMap<(DeviceId, SessionId), ServerSession>) {
        let now = now_millis();
        for ((_, session_id), session) in sessions.iter_mut() {
            if session.status == ResponderStatus::Active
                && now.saturating_sub(session.last_activity) > self.config.session_timeout_ms
            {
                session.status = ResponderStatus::Errored;
                session.error_message = Some("session lapsed".into());
                session.outgoing = None;
                tracing::warn!(%session_id, peer = %session.peer, "idle session lapsed");
            }
        }
    }

    fn active_session<'s>(
        &self,
        sessions: &'s mut HashMap<(DeviceId, SessionId), ServerSession>,
        peer: DeviceId,
        session_id: SessionId,
    ) -> ServerResult<&'s mut ServerSession> {
        self.lapse_idle(sessions);
        let session = sessions
            .get_mut(&(peer, session_id))
            .ok_or(ServerError::SessionNotFound { peer, session_id })?;
        match session.status {
            ResponderStatus::Active => {
                session.last_activity = now_millis();
                Ok(session)
            }
            ResponderStatus::Completed => Err(ServerError::SessionErrored {
                session_id,
                message: "session already completed".into(),
            }),
            ResponderStatus::Errored => Err(ServerError::SessionErrored {
                session_id,
                message: session
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "session errored".into()),
            }),
        }
    }

    /// Applies a pushed batch to the change log, re-stamping each
    /// surviving record with a fresh central tick so every other peer's
    /// bookmark will see it.
    fn persist_batch(
        &self,
        envelope: &BatchEnvelope,
        session_id: SessionId,
        start_tick: Tick,
        peer_tier: NodeTier,
    ) -> ServerResult<()> {
        // validate everything before writing anything: a structurally bad
        // batch changes nothing
        for record in &envelope.records {
            if let Some(payload) = &record.payload {
                record
                    .record_type
                    .validate_payload(payload)
                    .map_err(ServerError::from)?;
            } else if record.deleted_at.is_none() {
                return Err(ServerError::Integrity(format!(
                    "batch {} record '{}' has neither payload nor deletion",
                    envelope.address, record.record_id
                )));
            }
        }

        let clock = self.change_log.clock();
        for record in &envelope.records {
            if self
                .change_log
                .contains(record.record_type, &record.record_id, record.tick)
            {
                continue;
            }
            // replayed content from an interrupted session arrives under
            // fresh wire ticks; skip if the live view already matches
            if let Some(latest) = self
                .change_log
                .latest_for(record.record_type, &record.record_id)
            {
                if latest.payload == record.payload {
                    continue;
                }
            }

            let competitor = self
                .change_log
                .competitor_since(record.record_type, &record.record_id, start_tick)
                // an earlier record from this same session is a sequential
                // update from the same peer, not a conflict
                .filter(|local| local.session_id != Some(session_id));

            match competitor {
                None => {
                    let restamp = clock.next_tick().map_err(ServerError::from)?;
                    self.change_log
                        .apply_incoming(record, session_id, Some(restamp), false)
                        .map_err(ServerError::from)?;
                }
                Some(local) => {
                    let resolution = resolve(record, peer_tier, &local, self.config.tier);
                    let incoming_wins = resolution.winner == Winner::Incoming;
                    self.change_log.record_conflict(resolution.conflict);
                    if incoming_wins {
                        let restamp = clock.next_tick().map_err(ServerError::from)?;
                        self.change_log
                            .apply_incoming(record, session_id, Some(restamp), false)
                            .map_err(ServerError::from)?;
                    } else {
                        self.change_log
                            .apply_incoming_retained(record, session_id)
                            .map_err(ServerError::from)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medisync_core::{ChangeRecord, LogicalClock, MemoryFactStore, Mutation, RecordType};
    use medisync_protocol::PlannedBatch;
    use serde_json::json;

    fn handler(require_auth: bool) -> CentralHandler {
        let facts: Arc<MemoryFactStore> = Arc::new(MemoryFactStore::new());
        let clock = Arc::new(LogicalClock::new(facts.clone()));
        let change_log = Arc::new(ChangeLog::new(clock));
        let config = ServerConfig::new(DeviceId::generate(), NodeTier::Central)
            .with_require_auth(require_auth)
            .with_max_batch_size(10);
        CentralHandler::new(config, facts, change_log)
    }

    fn start(handler: &CentralHandler, session: u64) -> (DeviceId, SessionGrant) {
        let peer = DeviceId::generate();
        let request = SessionRequest::new(
            SessionId::new(session),
            peer,
            NodeTier::Facility,
            Tick::ZERO,
        );
        let grant = handler.start_session(&request).unwrap();
        (peer, grant)
    }

    fn allergy_record(id: &str, name: &str, tick: u64) -> ChangeRecord {
        ChangeRecord::from_mutation(
            Mutation::upsert(
                RecordType::Allergy,
                id,
                json!({ "patientId": "p1", "name": name }),
            ),
            Tick::new(tick),
        )
    }

    fn envelope(session: u64, index: u32, records: Vec<ChangeRecord>) -> BatchEnvelope {
        BatchEnvelope::from_planned(PlannedBatch {
            address: BatchAddress::new(SessionId::new(session), RecordType::Allergy, index),
            records,
        })
    }

    #[test]
    fn grant_echoes_session_and_reserves_ticks() {
        let handler = handler(false);
        let (_, grant) = start(&handler, 7);
        assert_eq!(grant.session_id, SessionId::new(7));
        assert_eq!(grant.tier, NodeTier::Central);
        // a pair was reserved
        assert!(grant.session_tick > Tick::ZERO);
    }

    #[test]
    fn unauthenticated_session_is_refused() {
        let handler = handler(true);
        let request = SessionRequest::new(
            SessionId::new(1),
            DeviceId::generate(),
            NodeTier::Facility,
            Tick::ZERO,
        );
        assert!(matches!(
            handler.start_session(&request),
            Err(ServerError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn second_session_for_same_peer_is_refused() {
        let handler = handler(false);
        let (peer, _) = start(&handler, 1);
        let request =
            SessionRequest::new(SessionId::new(2), peer, NodeTier::Facility, Tick::ZERO);
        assert!(matches!(
            handler.start_session(&request),
            Err(ServerError::SessionInProgress { .. })
        ));
    }

    #[test]
    fn capacity_is_enforced() {
        let facts: Arc<MemoryFactStore> = Arc::new(MemoryFactStore::new());
        let clock = Arc::new(LogicalClock::new(facts.clone()));
        let change_log = Arc::new(ChangeLog::new(clock));
        let config = ServerConfig::new(DeviceId::generate(), NodeTier::Central)
            .with_require_auth(false)
            .with_max_concurrent_sessions(1);
        let handler = CentralHandler::new(config, facts, change_log);

        start(&handler, 1);
        let request = SessionRequest::new(
            SessionId::new(2),
            DeviceId::generate(),
            NodeTier::Facility,
            Tick::ZERO,
        );
        assert!(matches!(handler.start_session(&request), Err(ServerError::Busy)));
    }

    #[test]
    fn regressed_peer_bookmark_is_fatal() {
        let handler = handler(false);
        let peer = DeviceId::generate();
        // a previous session committed tick 50 for this peer
        let request = SessionRequest::new(SessionId::new(1), peer, NodeTier::Facility, Tick::new(50));
        let grant = handler.start_session(&request).unwrap();
        handler
            .complete_session(
                peer,
                &CompleteRequest {
                    session_id: SessionId::new(1),
                    end_tick: Tick::new(60),
                },
            )
            .unwrap();
        assert_eq!(grant.start_tick, Tick::new(50));

        // the peer now claims an older bookmark than it committed
        let request = SessionRequest::new(SessionId::new(2), peer, NodeTier::Facility, Tick::new(10));
        assert!(matches!(
            handler.start_session(&request),
            Err(ServerError::ClockRegression { .. })
        ));
    }

    #[test]
    fn pushed_batch_is_persisted_and_restamped() {
        let handler = handler(false);
        let (peer, grant) = start(&handler, 1);

        let batch = envelope(1, 0, vec![allergy_record("a1", "dust", grant.session_tick.as_u64() + 1)]);
        let ack = handler.receive_batch(peer, &batch).unwrap();
        assert_eq!(ack.address, batch.address);

        let live = handler
            .change_log()
            .latest_for(RecordType::Allergy, "a1")
            .unwrap();
        assert_eq!(live.payload.as_ref().unwrap()["name"], "dust");
        // re-stamped onto the central sequence
        assert!(live.tick > grant.session_tick);
    }

    #[test]
    fn re_receiving_a_batch_is_a_no_op() {
        let handler = handler(false);
        let (peer, grant) = start(&handler, 1);

        let batch = envelope(1, 0, vec![allergy_record("a1", "dust", grant.session_tick.as_u64() + 1)]);
        handler.receive_batch(peer, &batch).unwrap();
        let log_len = handler.change_log().len();

        handler.receive_batch(peer, &batch).unwrap();
        assert_eq!(handler.change_log().len(), log_len);
    }

    #[test]
    fn sequential_updates_from_one_peer_are_not_conflicts() {
        let handler = handler(false);
        let (peer, grant) = start(&handler, 1);
        let base = grant.session_tick.as_u64();

        let batch = envelope(
            1,
            0,
            vec![
                allergy_record("x", "first", base + 1),
                allergy_record("x", "second", base + 3),
            ],
        );
        handler.receive_batch(peer, &batch).unwrap();

        let live = handler
            .change_log()
            .latest_for(RecordType::Allergy, "x")
            .unwrap();
        assert_eq!(live.payload.as_ref().unwrap()["name"], "second");
        assert!(handler.change_log().conflicts().is_empty());
    }

    #[test]
    fn conflicting_push_resolves_by_tick() {
        let handler = handler(false);
        // central's own change first
        let central_record = handler
            .change_log()
            .record(Mutation::upsert(
                RecordType::Allergy,
                "x",
                json!({ "patientId": "p1", "name": "central" }),
            ))
            .unwrap();

        let peer = DeviceId::generate();
        let request =
            SessionRequest::new(SessionId::new(1), peer, NodeTier::Facility, Tick::ZERO);
        let grant = handler.start_session(&request).unwrap();

        // the peer's change carries a later tick: it wins
        let batch = envelope(
            1,
            0,
            vec![allergy_record("x", "facility", grant.session_tick.as_u64() + 1)],
        );
        handler.receive_batch(peer, &batch).unwrap();

        let live = handler
            .change_log()
            .latest_for(RecordType::Allergy, "x")
            .unwrap();
        assert_eq!(live.payload.as_ref().unwrap()["name"], "facility");

        let conflicts = handler.change_log().conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].losing_tick, central_record.tick);
    }

    #[test]
    fn losing_push_is_retained_but_not_live() {
        let handler = handler(false);
        let peer = DeviceId::generate();
        let request =
            SessionRequest::new(SessionId::new(1), peer, NodeTier::Facility, Tick::ZERO);
        let grant = handler.start_session(&request).unwrap();

        // central writes after granting, at ticks beyond the session pair
        let central_record = handler
            .change_log()
            .record(Mutation::upsert(
                RecordType::Allergy,
                "x",
                json!({ "patientId": "p1", "name": "central" }),
            ))
            .unwrap();
        assert!(central_record.tick > grant.session_tick);

        // the peer pushes an older change for the same entity
        let batch = envelope(1, 0, vec![allergy_record("x", "facility", 1)]);
        handler.receive_batch(peer, &batch).unwrap();

        let live = handler
            .change_log()
            .latest_for(RecordType::Allergy, "x")
            .unwrap();
        assert_eq!(live.payload.as_ref().unwrap()["name"], "central");
        assert_eq!(handler.change_log().conflicts().len(), 1);
    }

    #[test]
    fn pull_serves_window_in_batches_and_drains() {
        let handler = handler(false);
        for i in 0..3 {
            handler
                .change_log()
                .record(Mutation::upsert(
                    RecordType::Allergy,
                    format!("a{i}"),
                    json!({ "patientId": "p1", "name": "dust" }),
                ))
                .unwrap();
        }

        let (peer, _) = start(&handler, 1);
        let first = handler
            .serve_next_batch(peer, SessionId::new(1))
            .unwrap()
            .unwrap();
        assert_eq!(first.records.len(), 3);
        assert!(handler
            .serve_next_batch(peer, SessionId::new(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn pull_excludes_what_the_session_pushed() {
        let handler = handler(false);
        let (peer, grant) = start(&handler, 1);

        let batch = envelope(1, 0, vec![allergy_record("a1", "dust", grant.session_tick.as_u64() + 1)]);
        handler.receive_batch(peer, &batch).unwrap();

        assert!(handler
            .serve_next_batch(peer, SessionId::new(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn complete_advances_bookmark_monotonically() {
        let handler = handler(false);
        let (peer, _) = start(&handler, 1);

        handler
            .complete_session(
                peer,
                &CompleteRequest {
                    session_id: SessionId::new(1),
                    end_tick: Tick::new(90),
                },
            )
            .unwrap();
        assert_eq!(handler.bookmark_for(peer).unwrap(), Tick::new(90));

        // a later, lower end tick can never regress it
        let request =
            SessionRequest::new(SessionId::new(2), peer, NodeTier::Facility, Tick::new(90));
        handler.start_session(&request).unwrap();
        handler
            .complete_session(
                peer,
                &CompleteRequest {
                    session_id: SessionId::new(2),
                    end_tick: Tick::new(40),
                },
            )
            .unwrap();
        assert_eq!(handler.bookmark_for(peer).unwrap(), Tick::new(90));
    }

    #[test]
    fn operations_on_completed_sessions_fail() {
        let handler = handler(false);
        let (peer, _) = start(&handler, 1);
        handler
            .complete_session(
                peer,
                &CompleteRequest {
                    session_id: SessionId::new(1),
                    end_tick: Tick::new(5),
                },
            )
            .unwrap();

        let result = handler.serve_next_batch(peer, SessionId::new(1));
        assert!(matches!(result, Err(ServerError::SessionErrored { .. })));
    }

    #[test]
    fn idle_sessions_lapse() {
        let facts: Arc<MemoryFactStore> = Arc::new(MemoryFactStore::new());
        let clock = Arc::new(LogicalClock::new(facts.clone()));
        let change_log = Arc::new(ChangeLog::new(clock));
        let config = ServerConfig::new(DeviceId::generate(), NodeTier::Central)
            .with_require_auth(false)
            .with_session_timeout_ms(0);
        let handler = CentralHandler::new(config, facts, change_log);

        let (peer, _) = start(&handler, 1);
        std::thread::sleep(std::time::Duration::from_millis(5));

        let result = handler.serve_next_batch(peer, SessionId::new(1));
        assert!(matches!(result, Err(ServerError::SessionErrored { .. })));

        // and the peer may start a fresh session afterwards
        let request =
            SessionRequest::new(SessionId::new(2), peer, NodeTier::Facility, Tick::ZERO);
        assert!(handler.start_session(&request).is_ok());
    }

    #[test]
    fn malformed_batch_is_an_integrity_error() {
        let handler = handler(false);
        let (peer, _) = start(&handler, 1);

        let mut batch = envelope(1, 0, vec![allergy_record("a1", "dust", 500)]);
        batch.record_count = 9;
        assert!(matches!(
            handler.receive_batch(peer, &batch),
            Err(ServerError::Integrity(_))
        ));
        assert!(handler.change_log().is_empty());
    }

    #[test]
    fn abort_marks_session_errored() {
        let handler = handler(false);
        let (peer, _) = start(&handler, 1);

        handler.abort_session(peer, SessionId::new(1), "cancelled upstream");
        let session = handler.session(peer, SessionId::new(1)).unwrap();
        assert_eq!(session.status, ResponderStatus::Errored);
        assert_eq!(handler.active_session_count(), 0);
    }
}
