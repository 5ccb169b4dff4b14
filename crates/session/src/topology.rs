//! Authority liveness tracking and failover.
//!
//! The authority emits heartbeats; when it has been silent for the
//! configured timeout (heartbeat interval times the multiplier, 3x by
//! default), the next-ranked live participant is promoted. The promotion
//! event carries the last tick every surviving follower acknowledged: the
//! new authority seeds its reconciler from that snapshot, and followers roll
//! back to it exactly as in a normal reconciliation. Only when no viable
//! candidate remains does the session die.

use std::collections::{HashMap, HashSet};

use driftsync_core::{ParticipantId, SyncError, Tick};
use log::{debug, warn};

use crate::participant::{AuthorityToken, Participant, Role};

/// Broadcast when authority migrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityChanged {
    pub new_authority: ParticipantId,
    /// Last tick every surviving follower had acknowledged; reconciliation
    /// resumes from here.
    pub resume_tick: Tick,
}

/// Tracks who holds authority and whether they are alive.
pub struct TopologyManager {
    timeout_us: u64,
    authority: AuthorityToken,
    /// Local receive time of each participant's last heartbeat.
    last_heartbeat_us: HashMap<ParticipantId, u64>,
    /// Participants flagged desynchronized by the clock synchronizer;
    /// ineligible for promotion until they recover.
    desynchronized: HashSet<ParticipantId>,
}

impl TopologyManager {
    pub fn new(initial_authority: ParticipantId, heartbeat_timeout_ms: u64) -> Self {
        Self {
            timeout_us: heartbeat_timeout_ms * 1_000,
            authority: AuthorityToken {
                holder: initial_authority,
                since_tick: 0,
            },
            last_heartbeat_us: HashMap::new(),
            desynchronized: HashSet::new(),
        }
    }

    pub fn authority(&self) -> AuthorityToken {
        self.authority
    }

    /// Record a heartbeat received from a participant.
    pub fn observe_heartbeat(&mut self, participant: ParticipantId, now_us: u64) {
        self.last_heartbeat_us.insert(participant, now_us);
        // A heartbeat is also proof of clock recovery.
        self.desynchronized.remove(&participant);
    }

    /// Flag from the clock synchronizer: this participant's clock samples
    /// have gone stale.
    pub fn flag_desynchronized(&mut self, participant: ParticipantId) {
        if self.desynchronized.insert(participant) {
            debug!("participant {participant} flagged desynchronized");
        }
    }

    pub fn is_desynchronized(&self, participant: ParticipantId) -> bool {
        self.desynchronized.contains(&participant)
    }

    /// Forget a departed participant.
    pub fn remove_participant(&mut self, participant: ParticipantId) {
        self.last_heartbeat_us.remove(&participant);
        self.desynchronized.remove(&participant);
    }

    fn is_live(&self, participant: ParticipantId, now_us: u64) -> bool {
        match self.last_heartbeat_us.get(&participant) {
            Some(&at) => now_us.saturating_sub(at) <= self.timeout_us,
            None => false,
        }
    }

    /// Check authority liveness; promote on timeout.
    ///
    /// `participants` is the session's full roster. Returns `Ok(None)` while
    /// the authority is healthy, `Ok(Some(event))` when authority migrated,
    /// and `Err(AuthorityLost)` when no viable candidate remains, the one
    /// session-terminating condition.
    pub fn check(
        &mut self,
        now_us: u64,
        participants: &mut HashMap<ParticipantId, Participant>,
    ) -> Result<Option<AuthorityChanged>, SyncError> {
        if self.is_live(self.authority.holder, now_us) {
            return Ok(None);
        }

        warn!(
            "authority {} missed heartbeat timeout, promoting",
            self.authority.holder
        );

        // Next-ranked live, synchronized follower takes over.
        let mut candidates: Vec<&Participant> = participants
            .values()
            .filter(|p| {
                p.id != self.authority.holder
                    && p.role == Role::Follower
                    && self.is_live(p.id, now_us)
                    && !self.desynchronized.contains(&p.id)
            })
            .collect();
        candidates.sort_by_key(|p| p.rank);

        let Some(next) = candidates.first() else {
            return Err(SyncError::AuthorityLost);
        };
        let new_authority = next.id;

        // Resume from the last snapshot every surviving follower holds.
        let resume_tick = participants
            .values()
            .filter(|p| p.id != self.authority.holder && p.role != Role::Spectator)
            .map(|p| p.last_acked_tick)
            .min()
            .unwrap_or(0);

        let old_holder = self.authority.holder;
        if let Some(old) = participants.get_mut(&old_holder) {
            old.role = Role::Follower;
        }
        if let Some(new) = participants.get_mut(&new_authority) {
            new.role = Role::Authority;
        }
        self.authority = AuthorityToken {
            holder: new_authority,
            since_tick: resume_tick,
        };

        Ok(Some(AuthorityChanged {
            new_authority,
            resume_tick,
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
