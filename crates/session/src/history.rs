//! Retained snapshot history and lag compensation.
//!
//! The authority keeps a short ring of published snapshots (at least one
//! second by default). Lag compensation reconstructs where an entity was at
//! a past instant ("was entity X actually at position P when participant
//! Y's action was issued, accounting for Y's observed latency") by linear
//! interpolation between the two bracketing snapshots. Queries before the
//! retained window fail closed with `HistoryUnavailable`.

use std::collections::VecDeque;

use driftsync_core::{EntityId, EntityState, Snapshot, SyncError, Tick};

/// Ring buffer of published snapshots, oldest first.
pub struct SnapshotHistory {
    capacity: usize,
    tick_interval_us: u64,
    snapshots: VecDeque<Snapshot>,
}

impl SnapshotHistory {
    pub fn new(capacity: usize, tick_interval_us: u64) -> Self {
        Self {
            capacity: capacity.max(2),
            tick_interval_us,
            snapshots: VecDeque::new(),
        }
    }

    /// Record a published snapshot, evicting beyond capacity.
    pub fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.snapshots.front()
    }

    /// Retrieve the retained snapshot for an exact tick.
    pub fn get(&self, tick: Tick) -> Option<&Snapshot> {
        // The ring is contiguous in tick, so index arithmetic beats a scan.
        let first = self.snapshots.front()?.tick;
        if tick < first {
            return None;
        }
        self.snapshots.get((tick - first) as usize)
    }

    fn tick_time_us(&self, tick: Tick) -> u64 {
        u64::from(tick) * self.tick_interval_us
    }

    /// Reconstruct an entity's state at session time `t_us` (microseconds
    /// since the epoch).
    ///
    /// Position and velocity are linearly interpolated between the
    /// bracketing snapshots; orientation and discrete fields snap to the
    /// older bracket. Fails closed: a query before the retained window, or
    /// for an entity absent from the bracket, is `HistoryUnavailable`, and
    /// callers must treat that as "cannot validate".
    pub fn state_at(&self, entity: EntityId, t_us: u64) -> Result<EntityState, SyncError> {
        let oldest = self.oldest().ok_or(SyncError::HistoryUnavailable {
            requested_us: t_us,
            oldest_us: 0,
        })?;
        let oldest_us = self.tick_time_us(oldest.tick);
        if t_us < oldest_us {
            return Err(SyncError::HistoryUnavailable {
                requested_us: t_us,
                oldest_us,
            });
        }

        let unavailable = || SyncError::HistoryUnavailable {
            requested_us: t_us,
            oldest_us,
        };

        // Queries at or past the newest snapshot clamp to it.
        let newest = self.latest().ok_or_else(unavailable)?;
        if t_us >= self.tick_time_us(newest.tick) {
            return newest.get(entity).map(|e| e.state.clone()).ok_or_else(unavailable);
        }

        // Bracketing ticks around t.
        let lower_tick = (t_us / self.tick_interval_us) as Tick;
        let lower = self.get(lower_tick).ok_or_else(unavailable)?;
        let upper = self.get(lower_tick + 1).ok_or_else(unavailable)?;

        let before = lower.get(entity).ok_or_else(unavailable)?;
        let after = upper.get(entity).ok_or_else(unavailable)?;

        let span = self.tick_interval_us as f64;
        let frac = (t_us - self.tick_time_us(lower_tick)) as f64 / span;

        let mut state = before.state.clone();
        for i in 0..3 {
            state.position[i] = lerp(before.state.position[i], after.state.position[i], frac);
            state.velocity[i] = lerp(before.state.velocity[i], after.state.velocity[i], frac);
        }
        Ok(state)
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::Entity;

    const TICK_US: u64 = 10_000;

    fn snap(tick: Tick, x: f64) -> Snapshot {
        Snapshot::sealed(
            tick,
            vec![Entity {
                id: 1,
                state: EntityState {
                    position: [x, 0.0, 0.0],
                    velocity: [1.0, 0.0, 0.0],
                    ..EntityState::default()
                },
            }],
        )
    }

    fn history_over(ticks: std::ops::Range<Tick>) -> SnapshotHistory {
        let mut history = SnapshotHistory::new(100, TICK_US);
        for tick in ticks {
            history.push(snap(tick, f64::from(tick)));
        }
        history
    }

    #[test]
    fn exact_tick_lookup() {
        let history = history_over(0..10);
        assert_eq!(history.get(4).unwrap().tick, 4);
        assert!(history.get(10).is_none());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut history = SnapshotHistory::new(3, TICK_US);
        for tick in 0..5 {
            history.push(snap(tick, 0.0));
        }
        assert_eq!(history.oldest().unwrap().tick, 2);
        assert!(history.get(1).is_none());
        assert_eq!(history.get(4).unwrap().tick, 4);
    }

    #[test]
    fn interpolates_between_brackets() {
        let history = history_over(0..10);
        // Halfway between tick 3 (x=3) and tick 4 (x=4).
        let state = history.state_at(1, 35_000).unwrap();
        assert_eq!(state.position[0], 3.5);
        // Velocity equal on both sides stays put.
        assert_eq!(state.velocity[0], 1.0);
    }

    #[test]
    fn query_on_exact_snapshot_returns_it() {
        let history = history_over(0..10);
        let state = history.state_at(1, 30_000).unwrap();
        assert_eq!(state.position[0], 3.0);
    }

    #[test]
    fn query_before_window_fails_closed() {
        let history = history_over(5..10);
        let err = history.state_at(1, 20_000).unwrap_err();
        assert_eq!(
            err,
            SyncError::HistoryUnavailable {
                requested_us: 20_000,
                oldest_us: 50_000
            }
        );
    }

    #[test]
    fn query_past_newest_clamps_to_newest() {
        let history = history_over(0..10);
        let state = history.state_at(1, 1_000_000).unwrap();
        assert_eq!(state.position[0], 9.0);
    }

    #[test]
    fn unknown_entity_fails_closed() {
        let history = history_over(0..10);
        assert!(matches!(
            history.state_at(99, 35_000),
            Err(SyncError::HistoryUnavailable { .. })
        ));
    }

    #[test]
    fn empty_history_fails_closed() {
        let history = SnapshotHistory::new(10, TICK_US);
        assert!(matches!(
            history.state_at(1, 0),
            Err(SyncError::HistoryUnavailable { .. })
        ));
    }
}
