//! Client-side delta baseline tracking.
//!
//! The authority encodes deltas against the last snapshot this client
//! acknowledged. The store holds that baseline, folds each tick's delta
//! packets into it, and surfaces the tick the caller should acknowledge
//! next. A packet based on a tick we no longer hold is rejected whole; the
//! caller answers with a resync request rather than guessing.

use driftsync_core::{Snapshot, SyncError, Tick};
use driftsync_wire::delta::{DeltaPacketProto, apply_delta};
use log::debug;

/// Holds the acknowledged baseline snapshot and advances it by deltas.
pub struct BaselineStore {
    baseline: Snapshot,
}

impl BaselineStore {
    pub fn new(initial: Snapshot) -> Self {
        Self { baseline: initial }
    }

    /// The tick to report in acknowledgements.
    pub fn tick(&self) -> Tick {
        self.baseline.tick
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.baseline
    }

    /// Fold one tick's delta packets (one per interest tier) into the
    /// baseline.
    ///
    /// All packets must share this store's baseline tick and a common
    /// current tick; tier entry sets are disjoint, so they are merged into
    /// a single application. Any mismatch rejects the whole update without
    /// touching the baseline.
    pub fn apply_update(&mut self, packets: &[DeltaPacketProto]) -> Result<&Snapshot, SyncError> {
        let Some(first) = packets.first() else {
            return Ok(&self.baseline);
        };

        let mut combined = DeltaPacketProto {
            baseline_tick: first.baseline_tick,
            current_tick: first.current_tick,
            tier: first.tier,
            entries: Vec::new(),
        };
        for packet in packets {
            if packet.baseline_tick != combined.baseline_tick
                || packet.current_tick != combined.current_tick
            {
                return Err(SyncError::MalformedPacket(format!(
                    "delta batch spans ticks {}..{} and {}..{}",
                    combined.baseline_tick,
                    combined.current_tick,
                    packet.baseline_tick,
                    packet.current_tick
                )));
            }
            combined.entries.extend(packet.entries.iter().cloned());
        }

        let next = apply_delta(&self.baseline, &combined)?;
        debug!(
            "advanced baseline {} -> {} ({} entries)",
            self.baseline.tick,
            next.tick,
            combined.entries.len()
        );
        self.baseline = next;
        Ok(&self.baseline)
    }

    /// Replace the baseline with a full authoritative snapshot.
    pub fn adopt(&mut self, full: Snapshot) {
        self.baseline = full;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::{Entity, EntityState};
    use driftsync_wire::delta::encode_delta;

    fn entity(id: u32, x: f64) -> Entity {
        Entity {
            id,
            state: EntityState {
                position: [x, 0.0, 0.0],
                ..EntityState::default()
            },
        }
    }

    #[test]
    fn tiered_packets_merge_into_one_update() {
        let base = Snapshot::sealed(5, vec![entity(1, 0.0), entity(2, 0.0)]);
        let current = Snapshot::sealed(6, vec![entity(1, 1.0), entity(2, 2.0)]);

        let critical = encode_delta(&base, &current, 0, &[1]);
        let background = encode_delta(&base, &current, 2, &[2]);

        let mut store = BaselineStore::new(base);
        let next = store.apply_update(&[critical, background]).unwrap();
        assert_eq!(next.tick, 6);
        assert_eq!(next.hash, current.hash);
        assert_eq!(store.tick(), 6);
    }

    #[test]
    fn mis_based_delta_is_rejected_whole() {
        let base = Snapshot::sealed(5, vec![entity(1, 0.0)]);
        let other = Snapshot::sealed(7, vec![entity(1, 3.0)]);
        let current = Snapshot::sealed(8, vec![entity(1, 4.0)]);
        let packet = encode_delta(&other, &current, 0, &[1]);

        let mut store = BaselineStore::new(base.clone());
        let err = store.apply_update(&[packet]).unwrap_err();
        assert!(matches!(err, SyncError::MalformedPacket(_)));
        assert_eq!(store.snapshot().hash, base.hash);
    }

    #[test]
    fn mixed_tick_batch_is_rejected_whole() {
        let base = Snapshot::sealed(5, vec![entity(1, 0.0)]);
        let t6 = Snapshot::sealed(6, vec![entity(1, 1.0)]);
        let t7 = Snapshot::sealed(7, vec![entity(1, 2.0)]);
        let a = encode_delta(&base, &t6, 0, &[1]);
        let b = encode_delta(&base, &t7, 0, &[1]);

        let mut store = BaselineStore::new(base.clone());
        assert!(store.apply_update(&[a, b]).is_err());
        assert_eq!(store.tick(), 5);
    }

    #[test]
    fn empty_update_is_a_no_op() {
        let base = Snapshot::sealed(5, vec![entity(1, 0.0)]);
        let mut store = BaselineStore::new(base.clone());
        let next = store.apply_update(&[]).unwrap();
        assert_eq!(next.hash, base.hash);
    }

    #[test]
    fn adopt_replaces_baseline() {
        let mut store = BaselineStore::new(Snapshot::sealed(5, vec![entity(1, 0.0)]));
        store.adopt(Snapshot::sealed(30, vec![entity(1, 9.0)]));
        assert_eq!(store.tick(), 30);
    }
}
