//! Control commands and their deterministic ordering.

use crate::{AuthorityRank, EntityId, ParticipantId, Seq, Tick};

// ============================================================================
// Control Axes
// ============================================================================

/// Named control axes on a cooperatively controlled entity.
///
/// The axis index doubles as the slot into [`crate::EntityState::controls`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAxis {
    Throttle,
    Brake,
    Steer,
    Collective,
}

impl ControlAxis {
    pub const ALL: [ControlAxis; 4] = [
        ControlAxis::Throttle,
        ControlAxis::Brake,
        ControlAxis::Steer,
        ControlAxis::Collective,
    ];

    pub fn index(self) -> usize {
        match self {
            ControlAxis::Throttle => 0,
            ControlAxis::Brake => 1,
            ControlAxis::Steer => 2,
            ControlAxis::Collective => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Physical limit the resolved (possibly summed) axis value is clamped
    /// to. Steer is symmetric; the others are one-sided.
    pub fn limits(self) -> (f64, f64) {
        match self {
            ControlAxis::Steer => (-1.0, 1.0),
            _ => (0.0, 1.0),
        }
    }

    /// Clamp a resolved axis value to its physical limits.
    pub fn clamp(self, value: f64) -> f64 {
        let (lo, hi) = self.limits();
        value.clamp(lo, hi)
    }
}

// ============================================================================
// Command Payloads
// ============================================================================

/// The closed set of action classes a command can carry.
///
/// Keeping this a closed enum lets the conflict resolver define its merge
/// policy exhaustively per variant; adding a variant without choosing a
/// policy is a compile error, not a runtime surprise.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
    /// Additive: independent force inputs on a shared subsystem are summed
    /// and clamped to the axis limits.
    Axis {
        entity: EntityId,
        axis: ControlAxis,
        value: f64,
    },
    /// Exclusive-ownership: take primary control of an entity. Contenders
    /// resolve to the lowest authority rank.
    TakeControl { entity: EntityId },
    /// Mutually exclusive state transition. Contenders resolve to the lowest
    /// `(rank, seq)` tuple; losers are reported back as rejected.
    ModeSwitch { entity: EntityId, mode: u8 },
}

impl CommandPayload {
    /// The entity this command targets.
    pub fn entity(&self) -> EntityId {
        match *self {
            CommandPayload::Axis { entity, .. }
            | CommandPayload::TakeControl { entity }
            | CommandPayload::ModeSwitch { entity, .. } => entity,
        }
    }

    /// True when every continuous value in the payload is finite.
    /// Non-finite payloads are dropped at the input channel, so the step
    /// function never sees them.
    pub fn is_finite(&self) -> bool {
        match *self {
            CommandPayload::Axis { value, .. } => value.is_finite(),
            CommandPayload::TakeControl { .. } | CommandPayload::ModeSwitch { .. } => true,
        }
    }
}

// ============================================================================
// Input Commands
// ============================================================================

/// A timestamped, sequence-numbered control command from one participant.
///
/// Immutable once created. `seq` increases monotonically per participant and
/// is the replay-protection key; `target_tick` is the logical tick the
/// command is meant to be reconciled at.
#[derive(Debug, Clone, PartialEq)]
pub struct InputCommand {
    pub participant: ParticipantId,
    pub seq: Seq,
    pub target_tick: Tick,
    /// Sender-side send time, microseconds on the sender's clock.
    pub timestamp_us: u64,
    pub payload: CommandPayload,
}

impl InputCommand {
    /// Deterministic ordering key: `(target_tick, authority rank, seq)`.
    ///
    /// Every replica sorting the same command set by this key reconciles an
    /// identical snapshot, which is what makes rehosting transparent.
    pub fn ordering_key(&self, rank: AuthorityRank) -> (Tick, AuthorityRank, Seq) {
        (self.target_tick, rank, self.seq)
    }
}

/// A command after conflict resolution, ready for the step function.
///
/// Carries only what the (pure) step function needs: who acted and what the
/// resolved action is. Merge products (e.g. summed axis values) are already
/// folded into the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCommand {
    pub participant: ParticipantId,
    pub payload: CommandPayload,
}

// ============================================================================
// Tests
// ============================================================================
