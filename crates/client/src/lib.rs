//! Driftsync client edge.
//!
//! Everything a participant runs locally: the rollback-and-replay
//! [`Predictor`], the delta [`BaselineStore`], clock synchronization against
//! the authority, and the freshest-wins snapshot [`mailbox`](mailbox::mailbox)
//! between the network and prediction threads. [`Client`] wires the pieces
//! together for callers that do not need to drive them individually.

#![deny(unsafe_code)]

pub mod baseline;
pub mod mailbox;
pub mod predictor;

use driftsync_core::{
    CommandPayload, InputCommand, KinematicStep, ParticipantId, Snapshot, StepFunction, SyncConfig,
    SyncError,
};
use driftsync_session::clock::ClockSync;
use driftsync_wire::delta::DeltaPacketProto;
use driftsync_wire::{
    AuthorityChangedProto, ClockPongProto, FullSnapshotProto, HeartbeatProto, ResyncRequestProto,
};

pub use baseline::BaselineStore;
pub use mailbox::{SnapshotReceiver, SnapshotSender, mailbox};
pub use predictor::{Predictor, Reconciliation};

/// One participant's complete client-side state.
pub struct Client {
    config: SyncConfig,
    participant: ParticipantId,
    publisher: SnapshotSender,
    snapshots: SnapshotReceiver,
    pub predictor: Predictor,
    pub baseline: BaselineStore,
    pub clock: ClockSync,
}

impl Client {
    /// Create a client seeded with the authority's join snapshot, using the
    /// reference kinematic step function.
    pub fn new(config: SyncConfig, participant: ParticipantId, initial: Snapshot) -> Self {
        Self::with_step(config, participant, initial, Box::new(KinematicStep::default()))
    }

    /// Create a client predicting through an external step function. It must
    /// be the same model the authority runs, or every tick will roll back.
    pub fn with_step(
        config: SyncConfig,
        participant: ParticipantId,
        initial: Snapshot,
        step: Box<dyn StepFunction>,
    ) -> Self {
        let clock = ClockSync::new(config.clock_ewma_weight, config.tick_interval_us);
        let (publisher, snapshots) = mailbox();
        Self {
            predictor: Predictor::new(config.clone(), participant, initial.clone(), step),
            baseline: BaselineStore::new(initial),
            clock,
            publisher,
            snapshots,
            config,
            participant,
        }
    }

    /// Handle for the network thread to publish decoded canonical snapshots
    /// into this client's mailbox.
    pub fn snapshot_publisher(&self) -> SnapshotSender {
        self.publisher.clone()
    }

    /// Queue a local command for immediate prediction; the returned command
    /// is what goes on the wire to the authority.
    pub fn submit(
        &mut self,
        payload: CommandPayload,
        timestamp_us: u64,
    ) -> Result<InputCommand, SyncError> {
        self.predictor.submit(payload, timestamp_us)
    }

    /// Run one prediction step: drain the snapshot mailbox first,
    /// reconciling against the freshest canonical state the network thread
    /// has published, then predict one tick forward.
    ///
    /// A [`Reconciliation::ResyncNeeded`] outcome means prediction has
    /// diverged past repair; send [`resync_request`](Self::resync_request).
    pub fn advance(&mut self) -> Reconciliation {
        let outcome = match self.snapshots.latest() {
            Some(canonical) => self.predictor.reconcile(canonical),
            None => Reconciliation::Clean,
        };
        self.predictor.advance();
        outcome
    }

    /// Fold one tick's delta packets into the baseline, then reconcile the
    /// prediction stack against the result.
    ///
    /// A baseline mismatch propagates; the caller should send a resync
    /// request and feed the answer to [`ingest_full`](Self::ingest_full).
    pub fn ingest_deltas(
        &mut self,
        packets: &[DeltaPacketProto],
    ) -> Result<Reconciliation, SyncError> {
        let canonical = self.baseline.apply_update(packets)?.clone();
        Ok(self.predictor.reconcile(canonical))
    }

    /// Adopt a full authoritative snapshot, replacing baseline and
    /// prediction state.
    pub fn ingest_full(&mut self, full: FullSnapshotProto) -> Result<(), SyncError> {
        let snapshot = Snapshot::try_from(full)?;
        self.baseline.adopt(snapshot.clone());
        self.predictor.apply_resync(snapshot);
        Ok(())
    }

    /// Liveness beacon carrying the confirmed tick and its digest, for the
    /// authority's divergence check.
    pub fn heartbeat(&self) -> HeartbeatProto {
        let confirmed = self.predictor.confirmed();
        HeartbeatProto {
            participant_id: u32::from(self.participant),
            tick: confirmed.tick,
            snapshot_hash: confirmed.hash,
        }
    }

    /// The resync request to send when prediction has diverged past repair
    /// or a delta arrived against a baseline we no longer hold.
    pub fn resync_request(&self) -> ResyncRequestProto {
        ResyncRequestProto {
            participant_id: u32::from(self.participant),
            last_known_tick: self.baseline.tick(),
        }
    }

    /// React to an authority migration.
    ///
    /// Reconciliation resumes from `resume_tick`; if our baseline is already
    /// past it the new authority's next snapshot reconciles normally, but a
    /// baseline behind the resume point cannot anchor deltas from the new
    /// authority and must be resynced.
    pub fn handle_authority_change(
        &mut self,
        change: &AuthorityChangedProto,
    ) -> Option<ResyncRequestProto> {
        if self.baseline.tick() < change.resume_tick {
            return Some(self.resync_request());
        }
        None
    }

    /// Record a completed clock round trip.
    pub fn record_clock_pong(&mut self, pong: &ClockPongProto, received_us: u64) {
        self.clock
            .record_sample(pong.ping_timestamp_echo, pong.server_timestamp, received_us);
    }

    /// True when no clock sample has arrived within the staleness bound;
    /// the participant should stop submitting until resynchronized.
    pub fn is_clock_stale(&self, now_us: u64) -> bool {
        self.clock
            .is_desynchronized(now_us, self.config.clock_stale_after_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::{ControlAxis, Entity, EntityState};
    use driftsync_wire::delta::encode_delta;

    fn world(tick: u32, x: f64) -> Snapshot {
        Snapshot::sealed(
            tick,
            vec![Entity {
                id: 10,
                state: EntityState {
                    position: [x, 0.0, 0.0],
                    owner: Some(1),
                    ..EntityState::default()
                },
            }],
        )
    }

    #[test]
    fn heartbeat_reports_confirmed_state() {
        let client = Client::new(SyncConfig::default(), 1, world(4, 0.0));
        let hb = client.heartbeat();
        assert_eq!(hb.participant_id, 1);
        assert_eq!(hb.tick, 4);
        assert_eq!(hb.snapshot_hash, world(4, 0.0).hash);
    }

    #[test]
    fn delta_ingest_reconciles_against_decoded_state() {
        let base = world(0, 0.0);
        let mut client = Client::new(SyncConfig::default(), 1, base.clone());

        let canonical = world(1, 2.5);
        let packet = encode_delta(&base, &canonical, 0, &[10]);
        let outcome = client.ingest_deltas(&[packet]).unwrap();

        // No local prediction at tick 1, so the decoded state is adopted.
        assert_eq!(outcome, Reconciliation::Clean);
        assert_eq!(client.baseline.tick(), 1);
        assert_eq!(client.predictor.confirmed().hash, canonical.hash);
    }

    #[test]
    fn mailbox_snapshot_reconciles_before_predicting() {
        let mut client = Client::new(SyncConfig::default(), 1, world(0, 0.0));
        let publisher = client.snapshot_publisher();

        // The network thread publishes twice before the prediction thread
        // steps; only the freshest snapshot is reconciled against.
        std::thread::spawn(move || {
            publisher.publish(world(1, 1.0));
            publisher.publish(world(2, 2.0));
        })
        .join()
        .unwrap();

        let outcome = client.advance();
        assert_eq!(outcome, Reconciliation::Clean);
        assert_eq!(client.predictor.confirmed().tick, 2);
        assert_eq!(client.predictor.confirmed().hash, world(2, 2.0).hash);
        // The step still predicts one tick on top of the adopted state.
        assert_eq!(client.predictor.head().tick, 3);
    }

    #[test]
    fn full_snapshot_resets_baseline_and_prediction() {
        let mut client = Client::new(SyncConfig::default(), 1, world(0, 0.0));
        client
            .submit(
                CommandPayload::Axis {
                    entity: 10,
                    axis: ControlAxis::Throttle,
                    value: 1.0,
                },
                0,
            )
            .unwrap();
        client.advance();

        let full = FullSnapshotProto::from(&world(9, 7.0));
        client.ingest_full(full).unwrap();
        assert_eq!(client.baseline.tick(), 9);
        assert_eq!(client.predictor.head().tick, 9);
    }

    #[test]
    fn authority_change_behind_baseline_is_absorbed() {
        let mut client = Client::new(SyncConfig::default(), 1, world(10, 0.0));
        let change = AuthorityChangedProto {
            new_authority: 2,
            resume_tick: 8,
        };
        assert_eq!(client.handle_authority_change(&change), None);

        let change = AuthorityChangedProto {
            new_authority: 2,
            resume_tick: 15,
        };
        let request = client.handle_authority_change(&change).unwrap();
        assert_eq!(request.participant_id, 1);
        assert_eq!(request.last_known_tick, 10);
    }

    #[test]
    fn clock_staleness_gates_submission() {
        let mut client = Client::new(SyncConfig::default(), 1, world(0, 0.0));
        let stale_after_us = SyncConfig::default().clock_stale_after_ms * 1_000;
        assert!(client.is_clock_stale(stale_after_us + 1));

        client.record_clock_pong(
            &ClockPongProto {
                server_tick: 5,
                server_timestamp: stale_after_us,
                ping_timestamp_echo: stale_after_us - 10_000,
            },
            stale_after_us + 1,
        );
        assert!(!client.is_clock_stale(stale_after_us + 1));
    }
}
