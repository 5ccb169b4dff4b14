//! Deterministic arbitration of same-entity, same-tick commands.
//!
//! Merge policy is keyed by action class:
//! - exclusive-ownership (`TakeControl`): lowest authority rank wins;
//! - additive (`Axis`): contributions are summed, then clamped to the axis
//!   limits;
//! - mutually exclusive transitions (`ModeSwitch`): lowest `(rank, seq)`
//!   wins.
//!
//! Losing commands are reported back to their originators. Nothing here may
//! depend on arrival order or wall-clock receipt time: the resolver sorts
//! its input by the deterministic ordering key before doing anything else.

use std::collections::BTreeMap;

use driftsync_core::{
    AuthorityRank, CommandPayload, ControlAxis, EntityId, InputCommand, ParticipantId,
    ResolvedCommand, Seq, SyncError,
};
use log::debug;

/// A losing command in a resolved conflict, reported to its originator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRejection {
    pub participant: ParticipantId,
    pub seq: Seq,
    pub entity: EntityId,
}

impl ConflictRejection {
    /// The error form delivered back to the originator.
    pub fn to_error(self) -> SyncError {
        SyncError::ConflictRejected {
            participant: self.participant,
            seq: self.seq,
            entity: self.entity,
        }
    }
}

/// Outcome of resolving one tick's command set.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Commands ready for the step function, in deterministic order.
    pub resolved: Vec<ResolvedCommand>,
    /// Losers, for delivery back to their originators.
    pub rejections: Vec<ConflictRejection>,
}

/// Resolve one tick's commands.
///
/// `rank_of` supplies each participant's static authority rank. The same
/// command set fed in any order produces the same resolution.
pub fn resolve(
    commands: &[InputCommand],
    rank_of: impl Fn(ParticipantId) -> AuthorityRank,
) -> Resolution {
    // Canonical order first, so grouping below never sees arrival order.
    let mut ordered: Vec<&InputCommand> = commands.iter().collect();
    ordered.sort_by_key(|c| c.ordering_key(rank_of(c.participant)));

    // Group keys are BTreeMaps so emission order is deterministic too.
    let mut axis_groups: BTreeMap<(EntityId, usize), Vec<&InputCommand>> = BTreeMap::new();
    let mut control_groups: BTreeMap<EntityId, Vec<&InputCommand>> = BTreeMap::new();
    let mut mode_groups: BTreeMap<EntityId, Vec<&InputCommand>> = BTreeMap::new();

    for cmd in ordered {
        match cmd.payload {
            CommandPayload::Axis { entity, axis, .. } => {
                axis_groups.entry((entity, axis.index())).or_default().push(cmd);
            }
            CommandPayload::TakeControl { entity } => {
                control_groups.entry(entity).or_default().push(cmd);
            }
            CommandPayload::ModeSwitch { entity, .. } => {
                mode_groups.entry(entity).or_default().push(cmd);
            }
        }
    }

    let mut resolved = Vec::new();
    let mut rejections = Vec::new();

    // Additive: sum and clamp. No losers; every contribution counts.
    for ((entity, axis_index), group) in &axis_groups {
        let axis = ControlAxis::from_index(*axis_index)
            .unwrap_or(ControlAxis::Throttle);
        let sum: f64 = group
            .iter()
            .map(|c| match c.payload {
                CommandPayload::Axis { value, .. } => value,
                _ => 0.0,
            })
            .sum();
        // Groups preserve the canonical sort, so the strongest contributor
        // fronts the merged command.
        let lead = group[0];
        resolved.push(ResolvedCommand {
            participant: lead.participant,
            payload: CommandPayload::Axis {
                entity: *entity,
                axis,
                value: axis.clamp(sum),
            },
        });
    }

    // Exclusive-ownership: the strongest rank takes the entity.
    for (entity, group) in &control_groups {
        let winner = group[0];
        resolved.push(ResolvedCommand {
            participant: winner.participant,
            payload: CommandPayload::TakeControl { entity: *entity },
        });
        for loser in &group[1..] {
            debug!(
                "take-control of entity {entity} by participant {} lost to rank {}",
                loser.participant,
                rank_of(winner.participant)
            );
            rejections.push(ConflictRejection {
                participant: loser.participant,
                seq: loser.seq,
                entity: *entity,
            });
        }
    }

    // Mutually exclusive transitions: lowest (rank, seq) wins outright.
    for (entity, group) in &mode_groups {
        let winner = group[0];
        resolved.push(ResolvedCommand {
            participant: winner.participant,
            payload: winner.payload.clone(),
        });
        for loser in &group[1..] {
            rejections.push(ConflictRejection {
                participant: loser.participant,
                seq: loser.seq,
                entity: *entity,
            });
        }
    }

    Resolution {
        resolved,
        rejections,
    }
}

// ============================================================================
// Tests
// ============================================================================
