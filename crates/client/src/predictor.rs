//! Client-side prediction with rollback-and-replay.
//!
//! The predictor applies local commands immediately against the last
//! confirmed snapshot, stacking predicted ticks ahead of it. When a
//! canonical snapshot arrives, the prediction at that tick is compared by
//! hash: a match confirms silently, a mismatch rolls the world back to the
//! canonical state and replays every not-yet-consumed local command through
//! the same step function. Repeated mismatches escalate to a full resync.

use std::collections::VecDeque;

use driftsync_core::{
    CommandPayload, InputCommand, ParticipantId, ResolvedCommand, Seq, Snapshot, StepFunction,
    SyncConfig, SyncError, Tick,
};
use log::{debug, warn};

/// Outcome of folding one canonical snapshot into local prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Prediction matched (or the snapshot was adopted without one).
    Clean,
    /// Prediction diverged; state was rewound and local commands replayed.
    RolledBack { replayed: u32 },
    /// Divergence persisted past the threshold; the caller should request a
    /// full resync from the authority.
    ResyncNeeded,
}

/// Local prediction state for one participant.
pub struct Predictor {
    config: SyncConfig,
    step: Box<dyn StepFunction>,
    participant: ParticipantId,
    /// Last canonical snapshot accepted from the authority.
    confirmed: Snapshot,
    /// Locally simulated ticks after `confirmed`, oldest first.
    predicted: VecDeque<Snapshot>,
    /// Local commands not yet covered by a canonical snapshot, seq order.
    pending: VecDeque<InputCommand>,
    next_seq: Seq,
    rollbacks: u64,
    predictions: u64,
    desync_streak: u32,
}

impl Predictor {
    pub fn new(
        config: SyncConfig,
        participant: ParticipantId,
        initial: Snapshot,
        step: Box<dyn StepFunction>,
    ) -> Self {
        Self {
            config,
            step,
            participant,
            confirmed: initial,
            predicted: VecDeque::new(),
            pending: VecDeque::new(),
            next_seq: 1,
            rollbacks: 0,
            predictions: 0,
            desync_streak: 0,
        }
    }

    /// The newest local view: the head prediction, or the confirmed
    /// snapshot when nothing is predicted.
    pub fn head(&self) -> &Snapshot {
        self.predicted.back().unwrap_or(&self.confirmed)
    }

    pub fn confirmed(&self) -> &Snapshot {
        &self.confirmed
    }

    /// Rollbacks per predicted tick. The convergence health metric: near
    /// zero when prediction tracks the authority well.
    pub fn reconciliation_rate(&self) -> f64 {
        if self.predictions == 0 {
            0.0
        } else {
            self.rollbacks as f64 / self.predictions as f64
        }
    }

    /// Queue a local command and return it for transmission to the
    /// authority. The command targets the next tick to be predicted, so
    /// [`advance`](Self::advance) applies it immediately.
    pub fn submit(&mut self, payload: CommandPayload, timestamp_us: u64) -> Result<InputCommand, SyncError> {
        if !payload.is_finite() {
            return Err(SyncError::MalformedPacket(
                "non-finite command payload".into(),
            ));
        }
        let cmd = InputCommand {
            participant: self.participant,
            seq: self.next_seq,
            target_tick: self.head().tick + 1,
            timestamp_us,
            payload,
        };
        self.next_seq += 1;
        self.pending.push_back(cmd.clone());
        Ok(cmd)
    }

    /// Predict one tick forward from the current head.
    pub fn advance(&mut self) -> &Snapshot {
        let head_tick = self.head().tick;
        let next = self.simulate(self.head().clone(), head_tick + 1);
        self.predicted.push_back(next);
        self.predictions += 1;
        self.head()
    }

    /// Fold a canonical snapshot into the local prediction stack.
    pub fn reconcile(&mut self, canonical: Snapshot) -> Reconciliation {
        if canonical.tick <= self.confirmed.tick {
            debug!("stale canonical snapshot for tick {}", canonical.tick);
            return Reconciliation::Clean;
        }

        // Commands the authority has now folded into canonical state are
        // spent; replay only what is still ahead of it.
        self.pending.retain(|cmd| cmd.target_tick > canonical.tick);

        let local = self
            .predicted
            .iter()
            .find(|s| s.tick == canonical.tick)
            .map(|s| s.hash);

        match local {
            Some(hash) if hash == canonical.hash => {
                while self
                    .predicted
                    .front()
                    .is_some_and(|s| s.tick <= canonical.tick)
                {
                    self.predicted.pop_front();
                }
                self.confirmed = canonical;
                self.desync_streak = 0;
                Reconciliation::Clean
            }
            Some(local_hash) => {
                warn!(
                    "desync at tick {}: local {:#018x} != canonical {:#018x}",
                    canonical.tick, local_hash, canonical.hash
                );
                self.desync_streak += 1;
                if self.desync_streak >= self.config.desync_resync_threshold {
                    self.desync_streak = 0;
                    return Reconciliation::ResyncNeeded;
                }
                let replayed = self.rollback_to(canonical);
                self.rollbacks += 1;
                Reconciliation::RolledBack { replayed }
            }
            None => {
                // The authority is ahead of local prediction; adopt and
                // re-predict any remaining local ticks on top.
                let replayed = self.rollback_to(canonical);
                if replayed > 0 {
                    Reconciliation::RolledBack { replayed }
                } else {
                    Reconciliation::Clean
                }
            }
        }
    }

    /// Replace all local state with a full authoritative snapshot.
    pub fn apply_resync(&mut self, full: Snapshot) {
        self.pending.retain(|cmd| cmd.target_tick > full.tick);
        self.predicted.clear();
        self.confirmed = full;
        self.desync_streak = 0;
    }

    /// Rewind to `canonical` and re-simulate up to the previous head tick,
    /// reapplying pending commands. Returns the number of replayed ticks.
    fn rollback_to(&mut self, canonical: Snapshot) -> u32 {
        let old_head = self.head().tick.max(canonical.tick);
        self.predicted.clear();

        let mut cursor = canonical.clone();
        let mut replayed = 0;
        for tick in canonical.tick + 1..=old_head {
            cursor = self.simulate(cursor, tick);
            self.predicted.push_back(cursor.clone());
            replayed += 1;
        }
        self.confirmed = canonical;
        replayed
    }

    /// Step `from` one tick forward, applying pending commands that target
    /// `tick` in sequence order.
    fn simulate(&self, from: Snapshot, tick: Tick) -> Snapshot {
        let mut commands: Vec<&InputCommand> = self
            .pending
            .iter()
            .filter(|cmd| cmd.target_tick == tick)
            .collect();
        commands.sort_by_key(|cmd| cmd.seq);
        let resolved: Vec<ResolvedCommand> = commands
            .into_iter()
            .map(|cmd| ResolvedCommand {
                participant: cmd.participant,
                payload: cmd.payload.clone(),
            })
            .collect();
        self.step.step(&from, &resolved, self.config.dt_seconds())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::{ControlAxis, Entity, EntityState, KinematicStep};
    use proptest::prelude::*;

    fn world(tick: Tick) -> Snapshot {
        let entities = vec![
            Entity {
                id: 10,
                state: EntityState {
                    owner: Some(1),
                    ..EntityState::default()
                },
            },
            Entity {
                id: 11,
                state: EntityState {
                    owner: Some(2),
                    ..EntityState::default()
                },
            },
        ];
        Snapshot::sealed(tick, entities)
    }

    fn predictor() -> Predictor {
        Predictor::new(
            SyncConfig::default(),
            1,
            world(0),
            Box::new(KinematicStep::default()),
        )
    }

    fn throttle(entity: u32, value: f64) -> CommandPayload {
        CommandPayload::Axis {
            entity,
            axis: ControlAxis::Throttle,
            value,
        }
    }

    /// An authority running the same step function over the same commands
    /// confirms every prediction without a single rollback.
    #[test]
    fn matching_authority_confirms_cleanly() {
        let mut client = predictor();
        let step = KinematicStep::default();
        let config = SyncConfig::default();
        let mut server = world(0);

        for _ in 0..10 {
            let cmd = client.submit(throttle(10, 0.5), 0).unwrap();
            client.advance();

            let resolved = vec![ResolvedCommand {
                participant: cmd.participant,
                payload: cmd.payload,
            }];
            server = step.step(&server, &resolved, config.dt_seconds());

            assert_eq!(client.reconcile(server.clone()), Reconciliation::Clean);
        }

        assert_eq!(client.reconciliation_rate(), 0.0);
        assert_eq!(client.confirmed().hash, server.hash);
    }

    /// A remote command the client did not predict forces a rollback; after
    /// replay the local head equals the canonical state re-stepped with the
    /// client's own pending commands.
    #[test]
    fn unpredicted_remote_command_rolls_back_and_replays() {
        let mut client = predictor();
        let step = KinematicStep::default();
        let config = SyncConfig::default();

        // Client predicts two ticks ahead with its own input.
        client.submit(throttle(10, 0.5), 0).unwrap();
        client.advance();
        client.submit(throttle(10, 0.5), 0).unwrap();
        client.advance();

        // Authority's tick 1 also carries participant 2's command.
        let resolved = vec![
            ResolvedCommand {
                participant: 1,
                payload: throttle(10, 0.5),
            },
            ResolvedCommand {
                participant: 2,
                payload: throttle(11, 1.0),
            },
        ];
        let canonical = step.step(&world(0), &resolved, config.dt_seconds());
        assert_ne!(canonical.hash, client.confirmed().hash);

        let outcome = client.reconcile(canonical.clone());
        assert_eq!(outcome, Reconciliation::RolledBack { replayed: 1 });
        assert_eq!(client.confirmed().hash, canonical.hash);

        // Expected head: canonical stepped once more with the still-pending
        // tick 2 command.
        let expected = step.step(
            &canonical,
            &[ResolvedCommand {
                participant: 1,
                payload: throttle(10, 0.5),
            }],
            config.dt_seconds(),
        );
        assert_eq!(client.head().hash, expected.hash);
    }

    #[test]
    fn repeated_divergence_escalates_to_resync() {
        let mut client = predictor();
        let step = KinematicStep::default();
        let config = SyncConfig::default();

        // The authority sees a command stream the client never predicts.
        let mut canonical = world(0);
        let mut outcome = Reconciliation::Clean;
        for i in 0..config.desync_resync_threshold {
            client.advance();
            // A different throttle each tick, so every canonical diverges
            // from the client's no-input prediction.
            canonical = step.step(
                &canonical,
                &[ResolvedCommand {
                    participant: 2,
                    payload: throttle(11, 0.2 * (i + 1) as f64),
                }],
                config.dt_seconds(),
            );
            outcome = client.reconcile(canonical.clone());
        }
        assert_eq!(outcome, Reconciliation::ResyncNeeded);
    }

    #[test]
    fn resync_replaces_local_state() {
        let mut client = predictor();
        client.submit(throttle(10, 1.0), 0).unwrap();
        client.advance();
        client.advance();

        let full = world(20);
        client.apply_resync(full.clone());
        assert_eq!(client.head().hash, full.hash);
        assert_eq!(client.confirmed().tick, 20);
    }

    #[test]
    fn stale_canonical_is_ignored() {
        let mut client = predictor();
        client.apply_resync(world(20));
        let before = client.confirmed().hash;

        assert_eq!(client.reconcile(world(5)), Reconciliation::Clean);
        assert_eq!(client.confirmed().hash, before);
        assert_eq!(client.confirmed().tick, 20);
    }

    #[test]
    fn rate_counts_rollbacks_per_prediction() {
        let mut client = predictor();
        let step = KinematicStep::default();
        let config = SyncConfig::default();

        for i in 0..4u32 {
            client.advance();
            let payload = if i == 0 {
                // One divergent tick, then the client tracks cleanly.
                vec![ResolvedCommand {
                    participant: 2,
                    payload: throttle(11, 1.0),
                }]
            } else {
                Vec::new()
            };
            let base = client.confirmed().clone();
            let canonical = step.step(&base, &payload, config.dt_seconds());
            client.reconcile(canonical);
        }

        assert!((client.reconciliation_rate() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn non_finite_payload_is_rejected() {
        let mut client = predictor();
        let err = client.submit(throttle(10, f64::NAN), 0).unwrap_err();
        assert!(matches!(err, SyncError::MalformedPacket(_)));
    }

    proptest! {
        /// Whatever the local command stream, an authority running the same
        /// step function in lockstep confirms every tick without a rollback.
        #[test]
        fn lockstep_authority_never_rolls_back(
            values in proptest::collection::vec(0.0f64..=1.0, 1..20)
        ) {
            let mut client = predictor();
            let step = KinematicStep::default();
            let config = SyncConfig::default();
            let mut server = world(0);

            for value in values {
                let cmd = client.submit(throttle(10, value), 0).unwrap();
                client.advance();
                server = step.step(
                    &server,
                    &[ResolvedCommand {
                        participant: cmd.participant,
                        payload: cmd.payload,
                    }],
                    config.dt_seconds(),
                );
                prop_assert_eq!(client.reconcile(server.clone()), Reconciliation::Clean);
            }
            prop_assert_eq!(client.reconciliation_rate(), 0.0);
        }
    }
}
