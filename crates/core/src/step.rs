//! The step-function seam and a reference kinematic model.
//!
//! The physics force model is an external collaborator consumed behind
//! [`StepFunction`]: a pure `(state, inputs, dt) -> state'` that must be
//! side-effect-free and bit-identical for identical input on any machine.
//! The [`KinematicStep`] here is the deterministic reference model used by
//! tests and by sessions that run without an external engine.

use crate::command::{CommandPayload, ResolvedCommand};
use crate::snapshot::{Entity, Snapshot};

/// Deterministic step function: advances the world one tick.
///
/// Implementations MUST NOT perform I/O, read clocks, or use unseeded
/// randomness; the whole determinism contract (rollback, replay, rehosting)
/// rests on this seam.
pub trait StepFunction {
    /// Produce the successor snapshot at `previous.tick + 1`.
    ///
    /// `commands` is the conflict-resolved, deterministically ordered
    /// command set for this tick; `dt` is the fixed tick interval in
    /// seconds.
    fn step(&self, previous: &Snapshot, commands: &[ResolvedCommand], dt: f64) -> Snapshot;
}

/// Reference kinematic model: controls drive velocity, velocity drives
/// position. Deliberately simple, but exercises every payload class.
#[derive(Debug, Clone)]
pub struct KinematicStep {
    /// Units per second at full control deflection.
    pub speed: f64,
}

impl Default for KinematicStep {
    fn default() -> Self {
        Self { speed: 5.0 }
    }
}

impl StepFunction for KinematicStep {
    fn step(&self, previous: &Snapshot, commands: &[ResolvedCommand], dt: f64) -> Snapshot {
        let mut entities: Vec<Entity> = previous.entities.clone();

        // Apply resolved commands to the arena first. Command order within a
        // tick is already deterministic, so this loop is too.
        for resolved in commands {
            let target = resolved.payload.entity();
            let Some(entity) = entities.iter_mut().find(|e| e.id == target) else {
                continue;
            };
            match resolved.payload {
                CommandPayload::Axis { axis, value, .. } => {
                    entity.state.controls[axis.index()] = axis.clamp(value);
                }
                CommandPayload::TakeControl { .. } => {
                    entity.state.owner = Some(resolved.participant);
                }
                CommandPayload::ModeSwitch { mode, .. } => {
                    entity.state.mode = mode;
                }
            }
        }

        // Integrate: forward speed from throttle minus brake, lateral from
        // steer, vertical from collective.
        for entity in &mut entities {
            let c = &entity.state.controls;
            entity.state.velocity = [
                (c[0] - c[1]) * self.speed,
                c[2] * self.speed,
                c[3] * self.speed,
            ];
            for i in 0..3 {
                entity.state.position[i] += entity.state.velocity[i] * dt;
            }
        }

        Snapshot::sealed(previous.tick + 1, entities)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ControlAxis;
    use crate::snapshot::EntityState;

    fn world_with_entity(id: u32) -> Snapshot {
        Snapshot::sealed(
            0,
            vec![Entity {
                id,
                state: EntityState::default(),
            }],
        )
    }

    fn throttle(participant: u16, entity: u32, value: f64) -> ResolvedCommand {
        ResolvedCommand {
            participant,
            payload: CommandPayload::Axis {
                entity,
                axis: ControlAxis::Throttle,
                value,
            },
        }
    }

    #[test]
    fn throttle_moves_entity_forward() {
        let step = KinematicStep::default();
        let dt = 1.0 / 60.0;
        let mut snap = world_with_entity(1);

        for _ in 0..10 {
            snap = step.step(&snap, &[throttle(0, 1, 1.0)], dt);
        }

        let expected = 10.0 * 5.0 * dt;
        let entity = snap.get(1).unwrap();
        // Exact equality: determinism, not approximation.
        assert_eq!(entity.state.position[0], expected);
        assert_eq!(entity.state.position[1], 0.0);
        assert_eq!(snap.tick, 10);
    }

    #[test]
    fn identical_inputs_give_identical_digests() {
        let step = KinematicStep::default();
        let dt = 1.0 / 60.0;

        let run = || {
            let mut snap = world_with_entity(1);
            for _ in 0..100 {
                snap = step.step(&snap, &[throttle(0, 1, 0.37)], dt);
            }
            snap.hash
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn take_control_sets_owner() {
        let step = KinematicStep::default();
        let snap = world_with_entity(4);
        let next = step.step(
            &snap,
            &[ResolvedCommand {
                participant: 2,
                payload: CommandPayload::TakeControl { entity: 4 },
            }],
            1.0 / 60.0,
        );
        assert_eq!(next.get(4).unwrap().state.owner, Some(2));
    }

    #[test]
    fn mode_switch_sets_mode() {
        let step = KinematicStep::default();
        let snap = world_with_entity(4);
        let next = step.step(
            &snap,
            &[ResolvedCommand {
                participant: 0,
                payload: CommandPayload::ModeSwitch { entity: 4, mode: 3 },
            }],
            1.0 / 60.0,
        );
        assert_eq!(next.get(4).unwrap().state.mode, 3);
    }

    #[test]
    fn command_for_unknown_entity_is_ignored() {
        let step = KinematicStep::default();
        let snap = world_with_entity(1);
        let next = step.step(&snap, &[throttle(0, 99, 1.0)], 1.0 / 60.0);
        assert_eq!(next.entities.len(), 1);
        assert_eq!(next.get(1).unwrap().state.position, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn empty_inputs_still_advance_tick_deterministically() {
        let step = KinematicStep::default();
        let run = || {
            let mut snap = world_with_entity(1);
            for _ in 0..10 {
                snap = step.step(&snap, &[], 1.0 / 60.0);
            }
            (snap.tick, snap.hash)
        };
        assert_eq!(run(), run());
        assert_eq!(run().0, 10);
    }
}
