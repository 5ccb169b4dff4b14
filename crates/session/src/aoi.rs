//! Area-of-interest partitioning with hysteresis.
//!
//! Per participant, canonical entities fall into three priority tiers:
//! critical (owned or inside the immediate interaction radius, always sent),
//! relevant (inside the extended radius, sent at a distance-scaled stride),
//! background (everything else, rate-limited to the remaining budget).
//! Radius and rate parameters come from configuration. Tier boundaries use
//! hysteresis (enter at radius R, exit beyond R times the configured
//! factor) so an entity hovering at a boundary does not flap between tiers.

use std::collections::HashMap;

use driftsync_core::{EntityId, ParticipantId, Snapshot, SyncConfig, Tick};

/// AOI priority tier. Lower is more urgent; the numeric value is what goes
/// in the delta packet's tier field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Critical = 0,
    Relevant = 1,
    Background = 2,
}

/// The entity ids scheduled for one participant this tick, by tier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterestSet {
    pub critical: Vec<EntityId>,
    pub relevant: Vec<EntityId>,
    pub background: Vec<EntityId>,
}

/// Per-participant tier assignment with hysteresis memory.
pub struct AoiDistributor {
    critical_radius: f64,
    relevant_radius: f64,
    hysteresis: f64,
    budget: usize,
    /// Last assigned tier per (participant, entity); the hysteresis memory.
    tiers: HashMap<(ParticipantId, EntityId), Tier>,
    /// Round-robin cursor per participant for the background tier.
    cursors: HashMap<ParticipantId, usize>,
}

impl AoiDistributor {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            critical_radius: config.aoi_critical_radius,
            relevant_radius: config.aoi_relevant_radius,
            hysteresis: config.aoi_hysteresis_factor,
            budget: config.background_budget_per_tick,
            tiers: HashMap::new(),
            cursors: HashMap::new(),
        }
    }

    /// Current tier of an entity for a participant, if ever assigned.
    pub fn tier_of(&self, participant: ParticipantId, entity: EntityId) -> Option<Tier> {
        self.tiers.get(&(participant, entity)).copied()
    }

    /// Recompute tiers for one participant against a canonical snapshot and
    /// select which entities to send this tick.
    ///
    /// `focus` is the participant's point of view (usually its controlled
    /// entity's position). Critical entities are always included; relevant
    /// entities are staggered by a distance-scaled stride; background
    /// entities take whatever budget remains, round-robin so every one is
    /// eventually refreshed.
    pub fn partition(
        &mut self,
        tick: Tick,
        participant: ParticipantId,
        focus: [f64; 3],
        snapshot: &Snapshot,
    ) -> InterestSet {
        let mut critical = Vec::new();
        let mut relevant = Vec::new();
        let mut background = Vec::new();

        for entity in &snapshot.entities {
            let owned = entity.state.owner == Some(participant);
            let distance = dist(entity.state.position, focus);
            let previous = self.tiers.get(&(participant, entity.id)).copied();
            let tier = if owned {
                Tier::Critical
            } else {
                self.classify(distance, previous)
            };
            self.tiers.insert((participant, entity.id), tier);

            match tier {
                Tier::Critical => critical.push(entity.id),
                Tier::Relevant => {
                    if self.relevant_due(tick, entity.id, distance) {
                        relevant.push(entity.id);
                    }
                }
                Tier::Background => background.push(entity.id),
            }
        }

        // Entities gone from the snapshot lose their memory so a respawn
        // classifies fresh.
        self.tiers
            .retain(|&(p, e), _| p != participant || snapshot.contains(e));

        // Background: rotate through the candidate list, budget per tick.
        let background = self.take_background(participant, background);

        InterestSet {
            critical,
            relevant,
            background,
        }
    }

    /// Drop all tier memory for a departing participant.
    pub fn remove_participant(&mut self, participant: ParticipantId) {
        self.tiers.retain(|&(p, _), _| p != participant);
        self.cursors.remove(&participant);
    }

    /// Hysteresis classification: promotion thresholds use the plain entry
    /// radius, demotion thresholds the exit radius (entry times the factor).
    fn classify(&self, distance: f64, previous: Option<Tier>) -> Tier {
        let critical_exit = self.critical_radius * self.hysteresis;
        let relevant_exit = self.relevant_radius * self.hysteresis;

        match previous.unwrap_or(Tier::Background) {
            Tier::Critical => {
                if distance <= critical_exit {
                    Tier::Critical
                } else if distance <= relevant_exit {
                    Tier::Relevant
                } else {
                    Tier::Background
                }
            }
            Tier::Relevant => {
                if distance <= self.critical_radius {
                    Tier::Critical
                } else if distance <= relevant_exit {
                    Tier::Relevant
                } else {
                    Tier::Background
                }
            }
            Tier::Background => {
                if distance <= self.critical_radius {
                    Tier::Critical
                } else if distance <= self.relevant_radius {
                    Tier::Relevant
                } else {
                    Tier::Background
                }
            }
        }
    }

    /// Distance-scaled update stride for the relevant tier: entities near
    /// the critical boundary refresh every tick, entities near the outer
    /// edge every fourth. Staggered by entity id so refreshes spread across
    /// ticks.
    fn relevant_due(&self, tick: Tick, entity: EntityId, distance: f64) -> bool {
        let span = (self.relevant_radius - self.critical_radius).max(f64::MIN_POSITIVE);
        let depth = ((distance - self.critical_radius) / span).clamp(0.0, 1.0);
        let stride = 1 + (depth * 3.0) as u32;
        (tick + entity) % stride == 0
    }

    fn take_background(
        &mut self,
        participant: ParticipantId,
        candidates: Vec<EntityId>,
    ) -> Vec<EntityId> {
        if candidates.len() <= self.budget {
            return candidates;
        }
        let cursor = self.cursors.entry(participant).or_insert(0);
        let start = *cursor % candidates.len();
        let mut taken = Vec::with_capacity(self.budget);
        for i in 0..self.budget {
            taken.push(candidates[(start + i) % candidates.len()]);
        }
        *cursor = (start + self.budget) % candidates.len();
        taken
    }
}

fn dist(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

// ============================================================================
// Tests
// ============================================================================
