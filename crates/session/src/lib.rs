//! Driftsync session host.
//!
//! A [`Session`] is the authority-side engine of one synchronized
//! simulation: it collects inputs into a bounded per-tick window, resolves
//! conflicting commands deterministically, advances the world through the
//! pluggable step function, retains a rolling snapshot history for lag
//! compensation, and distributes interest-scoped deltas to every other
//! participant. It also tracks participant clocks and authority liveness,
//! migrating authority when the current holder goes silent.
//!
//! The session never reads wall clocks itself; every operation that needs
//! time takes a caller-supplied microsecond timestamp relative to the
//! session epoch. Two sessions fed the same joins, commands, and timestamps
//! produce bit-identical snapshots.

#![deny(unsafe_code)]

pub mod aoi;
pub mod clock;
pub mod conflict;
pub mod history;
pub mod input_channel;
pub mod participant;
pub mod topology;

use std::collections::HashMap;

use driftsync_core::{
    AuthorityRank, Entity, EntityId, InputCommand, KinematicStep, ParticipantId, Snapshot,
    StepFunction, SyncConfig, SyncError, Tick,
};
use driftsync_wire::delta::DeltaPacketProto;
use driftsync_wire::{ClockPingProto, ClockPongProto, FullSnapshotProto};
use log::{debug, info, warn};

use aoi::{AoiDistributor, Tier};
use clock::ClockSync;
use conflict::ConflictRejection;
use history::SnapshotHistory;
use input_channel::InputChannel;
use participant::{AuthorityToken, Participant, Role};
use topology::{AuthorityChanged, TopologyManager};

// ============================================================================
// Tick Outcome
// ============================================================================

/// Result of advancing the session by one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub tick: Tick,
    /// Canonical state digest at `tick`.
    pub hash: u64,
    /// Losing commands from conflict resolution, for delivery back to
    /// their originators.
    pub rejections: Vec<ConflictRejection>,
    /// Entities the step function drove non-finite, reverted to their
    /// prior-tick values.
    pub corrections: Vec<EntityId>,
}

/// One outbound state packet for a participant.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Tier-scoped delta against the participant's acknowledged baseline.
    Delta(DeltaPacketProto),
    /// Complete snapshot; sent when the participant's baseline has aged out
    /// of history or on explicit resync.
    Full(FullSnapshotProto),
}

// ============================================================================
// Session
// ============================================================================

/// Authority-side state for one synchronized simulation.
pub struct Session {
    config: SyncConfig,
    step: Box<dyn StepFunction>,
    participants: HashMap<ParticipantId, Participant>,
    next_rank: AuthorityRank,
    inputs: InputChannel,
    history: SnapshotHistory,
    aoi: AoiDistributor,
    topology: TopologyManager,
    current: Snapshot,
    /// Structural changes queued for the start of the next tick, so a tick's
    /// entity set never changes mid-step.
    pending_spawns: Vec<Entity>,
    pending_despawns: Vec<EntityId>,
    pending_releases: Vec<ParticipantId>,
    /// Consecutive mismatched-hash heartbeats per participant; at the
    /// configured threshold the participant gets a full resync.
    desync_streak: HashMap<ParticipantId, u32>,
}

impl Session {
    /// Create a session hosted by `host`, using the reference kinematic
    /// step function.
    pub fn new(config: SyncConfig, host: ParticipantId) -> Self {
        Self::with_step(config, host, Box::new(KinematicStep::default()))
    }

    /// Create a session with an external step function.
    pub fn with_step(config: SyncConfig, host: ParticipantId, step: Box<dyn StepFunction>) -> Self {
        let mut participants = HashMap::new();
        participants.insert(
            host,
            Participant::new(
                host,
                0,
                Role::Authority,
                ClockSync::new(config.clock_ewma_weight, config.tick_interval_us),
            ),
        );

        let inputs = InputChannel::new(config.input_window_ticks());
        let mut history = SnapshotHistory::new(
            config.history_window_ticks() as usize,
            config.tick_interval_us,
        );
        let aoi = AoiDistributor::new(&config);
        let topology = TopologyManager::new(host, config.heartbeat_timeout_ms());

        let current = Snapshot::empty(0);
        history.push(current.clone());

        Self {
            config,
            step,
            participants,
            next_rank: 1,
            inputs,
            history,
            aoi,
            topology,
            current,
            pending_spawns: Vec::new(),
            pending_despawns: Vec::new(),
            pending_releases: Vec::new(),
            desync_streak: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    pub fn current_tick(&self) -> Tick {
        self.current.tick
    }

    pub fn authority(&self) -> AuthorityToken {
        self.topology.authority()
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    // ------------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------------

    /// Admit a participant. Rank follows join order; the host keeps rank 0.
    pub fn join(&mut self, id: ParticipantId, role: Role) -> Result<(), SyncError> {
        if self.participants.contains_key(&id) {
            return Err(SyncError::MalformedPacket(format!(
                "participant {id} already joined"
            )));
        }
        let rank = self.next_rank;
        self.next_rank += 1;
        info!("participant {id} joined with rank {rank}");
        self.participants.insert(
            id,
            Participant::new(
                id,
                rank,
                role,
                ClockSync::new(self.config.clock_ewma_weight, self.config.tick_interval_us),
            ),
        );
        Ok(())
    }

    /// Remove a participant. Entities it owned are released (owner cleared)
    /// at the start of the next tick.
    pub fn leave(&mut self, id: ParticipantId) {
        if self.participants.remove(&id).is_none() {
            return;
        }
        info!("participant {id} left");
        self.inputs.remove_participant(id);
        self.aoi.remove_participant(id);
        self.topology.remove_participant(id);
        self.desync_streak.remove(&id);
        self.pending_releases.push(id);
    }

    // ------------------------------------------------------------------------
    // Entity lifecycle
    // ------------------------------------------------------------------------

    /// Queue an entity spawn, applied at the start of the next tick.
    pub fn spawn(&mut self, entity: Entity) -> Result<(), SyncError> {
        if !entity.state.is_finite() {
            return Err(SyncError::NonFiniteState {
                entity: entity.id,
                tick: self.current.tick,
            });
        }
        self.pending_spawns.push(entity);
        Ok(())
    }

    /// Queue an entity despawn, applied at the start of the next tick.
    pub fn despawn(&mut self, id: EntityId) {
        self.pending_despawns.push(id);
    }

    // ------------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------------

    /// Accept a command into the collection window.
    ///
    /// Rejects unknown senders and spectators, then defers to the channel's
    /// sequence and window checks. Rejected commands never mutate state.
    pub fn submit_command(&mut self, cmd: InputCommand) -> Result<(), SyncError> {
        let Some(participant) = self.participants.get(&cmd.participant) else {
            return Err(SyncError::MalformedPacket(format!(
                "command from unknown participant {}",
                cmd.participant
            )));
        };
        if !participant.can_submit() {
            return Err(SyncError::MalformedPacket(format!(
                "participant {} is a spectator",
                cmd.participant
            )));
        }
        self.inputs.submit(cmd, self.current.tick)
    }

    // ------------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------------

    /// Advance the simulation one tick.
    ///
    /// Applies queued structural changes, releases and resolves the tick's
    /// commands, runs the step function, reverts any entity driven
    /// non-finite, then seals and retains the canonical snapshot.
    pub fn step(&mut self) -> TickOutcome {
        let next_tick = self.current.tick + 1;

        let base = self.apply_pending();
        let released = self.release_inputs(next_tick);

        let ranks: HashMap<ParticipantId, AuthorityRank> = self
            .participants
            .iter()
            .map(|(&id, p)| (id, p.rank))
            .collect();
        let resolution = conflict::resolve(&released, |p| {
            ranks.get(&p).copied().unwrap_or(AuthorityRank::MAX)
        });

        let stepped = self
            .step
            .step(&base, &resolution.resolved, self.config.dt_seconds());

        // Fail soft on a bad step: revert each non-finite entity to its
        // prior-tick value and keep going.
        let mut corrections = Vec::new();
        let mut entities = stepped.entities;
        for entity in &mut entities {
            if !entity.state.is_finite() {
                warn!(
                    "entity {} non-finite at tick {}, reverting",
                    entity.id, next_tick
                );
                corrections.push(entity.id);
                if let Some(prior) = base.get(entity.id) {
                    entity.state = prior.state.clone();
                }
            }
        }
        // Reverting to a prior value can still leave a spawned-this-tick
        // entity non-finite; those are dropped outright.
        entities.retain(|e| e.state.is_finite());

        let sealed = Snapshot::sealed(next_tick, entities);
        self.history.push(sealed.clone());
        self.current = sealed;

        TickOutcome {
            tick: next_tick,
            hash: self.current.hash,
            rejections: resolution.rejections,
            corrections,
        }
    }

    /// Merge queued spawns, despawns, and ownership releases into the
    /// pre-step arena. Pending queues are drained in sorted order so the
    /// result is independent of call order within the tick.
    fn apply_pending(&mut self) -> Snapshot {
        let mut entities = self.current.entities.clone();

        self.pending_releases.sort_unstable();
        for &gone in &self.pending_releases {
            for entity in &mut entities {
                if entity.state.owner == Some(gone) {
                    entity.state.owner = None;
                }
            }
        }
        self.pending_releases.clear();

        self.pending_despawns.sort_unstable();
        for &id in &self.pending_despawns {
            entities.retain(|e| e.id != id);
        }
        self.pending_despawns.clear();

        self.pending_spawns.sort_by_key(|e| e.id);
        for entity in self.pending_spawns.drain(..) {
            if !entities.iter().any(|e| e.id == entity.id) {
                entities.push(entity);
            }
        }

        Snapshot::sealed(self.current.tick, entities)
    }

    /// Release this tick's commands, substituting each silent eligible
    /// participant's last released command.
    fn release_inputs(&mut self, tick: Tick) -> Vec<InputCommand> {
        let mut expected: Vec<ParticipantId> = self
            .participants
            .values()
            .filter(|p| p.can_submit())
            .map(|p| p.id)
            .collect();
        expected.sort_unstable();
        self.inputs.release(tick, &expected)
    }

    // ------------------------------------------------------------------------
    // Distribution
    // ------------------------------------------------------------------------

    /// Produce the outbound state packets for this tick.
    ///
    /// One delta per non-empty interest tier per participant, encoded
    /// against that participant's last acknowledged snapshot. A participant
    /// whose baseline has aged out of history gets a full snapshot instead.
    pub fn distribute(&mut self) -> Vec<(ParticipantId, Outbound)> {
        let holder = self.topology.authority().holder;
        let mut ids: Vec<ParticipantId> = self
            .participants
            .keys()
            .copied()
            .filter(|&id| id != holder)
            .collect();
        ids.sort_unstable();

        let mut out = Vec::new();
        for id in ids {
            let baseline_tick = self.participants[&id].last_acked_tick;
            let Some(baseline) = self.history.get(baseline_tick).cloned() else {
                debug!("baseline tick {baseline_tick} aged out for participant {id}, full resync");
                out.push((id, Outbound::Full(FullSnapshotProto::from(&self.current))));
                continue;
            };

            let focus = self.focus_of(id);
            let interest = self.aoi.partition(self.current.tick, id, focus, &self.current);

            for (tier, include) in [
                (Tier::Critical, &interest.critical),
                (Tier::Relevant, &interest.relevant),
                (Tier::Background, &interest.background),
            ] {
                if include.is_empty() {
                    continue;
                }
                let packet =
                    driftsync_wire::delta::encode_delta(&baseline, &self.current, tier as u32, include);
                if !packet.entries.is_empty() {
                    out.push((id, Outbound::Delta(packet)));
                }
            }
        }
        out
    }

    /// Record that a participant holds the canonical snapshot for `tick`;
    /// later deltas to it are encoded against that baseline.
    pub fn acknowledge(&mut self, id: ParticipantId, tick: Tick) {
        if let Some(p) = self.participants.get_mut(&id) {
            p.last_acked_tick = p.last_acked_tick.max(tick);
        }
    }

    /// Answer an explicit resync request with the current full snapshot.
    pub fn resync(&self) -> FullSnapshotProto {
        FullSnapshotProto::from(&self.current)
    }

    /// A participant's point of view: the position of the first entity it
    /// owns, or the origin.
    fn focus_of(&self, id: ParticipantId) -> [f64; 3] {
        self.current
            .entities
            .iter()
            .find(|e| e.state.owner == Some(id))
            .map(|e| e.state.position)
            .unwrap_or([0.0; 3])
    }

    // ------------------------------------------------------------------------
    // Clock and liveness
    // ------------------------------------------------------------------------

    /// Answer a clock ping with the current tick and local time.
    pub fn clock_pong(&self, ping: &ClockPingProto, now_us: u64) -> ClockPongProto {
        ClockPongProto {
            server_tick: self.current.tick,
            server_timestamp: now_us,
            ping_timestamp_echo: ping.sent_timestamp,
        }
    }

    /// Record a completed ping/pong round trip for a participant's clock.
    pub fn record_clock_sample(
        &mut self,
        id: ParticipantId,
        sent_us: u64,
        remote_us: u64,
        received_us: u64,
    ) {
        if let Some(p) = self.participants.get_mut(&id) {
            p.clock.record_sample(sent_us, remote_us, received_us);
        }
    }

    /// Record a heartbeat.
    ///
    /// The reported snapshot hash is checked against history; a run of
    /// mismatches at the resync threshold earns the sender a full snapshot.
    pub fn observe_heartbeat(
        &mut self,
        id: ParticipantId,
        tick: Tick,
        hash: u64,
        now_us: u64,
    ) -> Option<FullSnapshotProto> {
        self.topology.observe_heartbeat(id, now_us);

        let Some(canonical) = self.history.get(tick) else {
            return None;
        };
        if canonical.hash == hash {
            self.desync_streak.remove(&id);
            return None;
        }

        let streak = self.desync_streak.entry(id).or_insert(0);
        *streak += 1;
        warn!(
            "participant {id} hash mismatch at tick {tick} ({streak} consecutive)"
        );
        if *streak >= self.config.desync_resync_threshold {
            self.desync_streak.remove(&id);
            return Some(FullSnapshotProto::from(&self.current));
        }
        None
    }

    /// Flag participants whose clock samples have gone stale, then check
    /// authority liveness; promotes on timeout.
    pub fn check_topology(&mut self, now_us: u64) -> Result<Option<AuthorityChanged>, SyncError> {
        let stale_after = self.config.clock_stale_after_ms;
        for p in self.participants.values() {
            if p.clock.is_desynchronized(now_us, stale_after) {
                self.topology.flag_desynchronized(p.id);
            }
        }
        self.topology.check(now_us, &mut self.participants)
    }
}

// ============================================================================
// Tests
// ============================================================================
