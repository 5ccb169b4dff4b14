//! Session participants and the authority token.

use driftsync_core::{AuthorityRank, ParticipantId, Tick};

use crate::clock::ClockSync;

/// A participant's role within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Produces the canonical snapshot each tick.
    Authority,
    /// Predicts locally, converges to the authority's snapshots.
    Follower,
    /// Receives state but submits no commands.
    Spectator,
}

/// One connected participant.
///
/// Mutated only by the clock synchronizer (clock state) and the topology
/// manager (role); everything else treats participants as read-only.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    /// Static tie-break rank: host is 0, later joiners take join order.
    pub rank: AuthorityRank,
    pub role: Role,
    /// Last canonical tick this participant acknowledged; doubles as its
    /// delta baseline.
    pub last_acked_tick: Tick,
    pub clock: ClockSync,
}

impl Participant {
    pub fn new(id: ParticipantId, rank: AuthorityRank, role: Role, clock: ClockSync) -> Self {
        Self {
            id,
            rank,
            role,
            last_acked_tick: 0,
            clock,
        }
    }

    pub fn can_submit(&self) -> bool {
        self.role != Role::Spectator
    }
}

/// Identifies the current holder of simulation authority.
///
/// Transferable: the topology manager reassigns it on failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityToken {
    pub holder: ParticipantId,
    /// Tick from which this holder's snapshots are canonical.
    pub since_tick: Tick,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spectators_cannot_submit() {
        let clock = ClockSync::new(0.2, 16_667);
        let authority = Participant::new(0, 0, Role::Authority, clock.clone());
        let spectator = Participant::new(1, 1, Role::Spectator, clock);
        assert!(authority.can_submit());
        assert!(!spectator.can_submit());
    }
}
