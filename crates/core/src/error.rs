//! Error taxonomy for the synchronization core.
//!
//! Per-command and per-packet failures are handled locally by the component
//! that observes them and never abort the session loop; only session-level
//! failures (no viable authority candidate) terminate a session.

use thiserror::Error;

use crate::{EntityId, ParticipantId, Seq, Tick};

/// Errors that can occur inside the synchronization core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// Duplicate or replayed command: its sequence number is not greater
    /// than the last accepted one for that participant. Dropped, logged,
    /// not fatal.
    #[error("stale input from participant {participant}: seq {seq} <= last accepted {last}")]
    StaleInput {
        participant: ParticipantId,
        seq: Seq,
        last: Seq,
    },

    /// Command targets a tick outside the bounded collection window.
    /// Dropped, logged, not fatal.
    #[error("input for tick {target_tick} outside collection window at tick {current_tick}")]
    OutsideWindow {
        target_tick: Tick,
        current_tick: Tick,
    },

    /// The step function produced NaN/overflow output for an entity. The
    /// entity is reverted to its prior-tick value and the session continues.
    #[error("non-finite state for entity {entity} at tick {tick}")]
    NonFiniteState { entity: EntityId, tick: Tick },

    /// The losing command in a resolved conflict. Reported to its
    /// originator; not an error for the session.
    #[error("command seq {seq} from participant {participant} lost conflict over entity {entity}")]
    ConflictRejected {
        participant: ParticipantId,
        seq: Seq,
        entity: EntityId,
    },

    /// A lag-compensation query preceded the retained history window.
    /// Callers must fail closed rather than assume success.
    #[error("history unavailable: requested t={requested_us}us, oldest retained t={oldest_us}us")]
    HistoryUnavailable { requested_us: u64, oldest_us: u64 },

    /// Client snapshot hash diverged from the canonical snapshot. Triggers
    /// rollback-and-replay; repeated beyond a threshold, a full resync.
    #[error(
        "desync at tick {tick}: local hash {local_hash:#018x} != canonical {canonical_hash:#018x}"
    )]
    DesyncDetected {
        tick: Tick,
        local_hash: u64,
        canonical_hash: u64,
    },

    /// The authority missed its heartbeat timeout and no viable candidate
    /// remains. The only session-terminating error.
    #[error("authority lost: no viable candidate remains")]
    AuthorityLost,

    /// A packet failed to decode. The packet is dropped; retry/backoff is
    /// the transport's concern.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offender() {
        let err = SyncError::StaleInput {
            participant: 3,
            seq: 7,
            last: 9,
        };
        let text = err.to_string();
        assert!(text.contains("participant 3"));
        assert!(text.contains("seq 7"));
    }

    #[test]
    fn desync_display_shows_both_hashes() {
        let err = SyncError::DesyncDetected {
            tick: 12,
            local_hash: 0xaa,
            canonical_hash: 0xbb,
        };
        let text = err.to_string();
        assert!(text.contains("0x00000000000000aa"));
        assert!(text.contains("0x00000000000000bb"));
    }
}
