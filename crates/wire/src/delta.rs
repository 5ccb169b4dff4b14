//! Delta codec: changed-field encoding of snapshots against a baseline.
//!
//! A delta packet carries only the fields that changed since the snapshot
//! last acknowledged by the receiving participant, and is tagged with that
//! baseline tick. A decoder that does not hold the named baseline must
//! request a full resynchronization instead of applying the delta;
//! partially applying a mis-based delta is a correctness bug.
//!
//! Entry values are little-endian runs appended in ascending field-mask bit
//! order: f64 for the vector fields, u32 for the discrete ones. A run/mask
//! length mismatch decodes as a malformed packet.

use driftsync_core::{Entity, EntityId, EntityState, Snapshot, SyncError, Tick};
use prost::Message;

// ============================================================================
// Field Mask
// ============================================================================

pub const FIELD_POSITION: u32 = 1 << 0;
pub const FIELD_ORIENTATION: u32 = 1 << 1;
pub const FIELD_VELOCITY: u32 = 1 << 2;
pub const FIELD_CONTROLS: u32 = 1 << 3;
pub const FIELD_FLAGS: u32 = 1 << 4;
pub const FIELD_MODE: u32 = 1 << 5;
pub const FIELD_OWNER: u32 = 1 << 6;
/// The entity no longer exists at `current_tick`; the entry carries no
/// values.
pub const FIELD_REMOVED: u32 = 1 << 7;

const FIELD_ALL_STATE: u32 = FIELD_POSITION
    | FIELD_ORIENTATION
    | FIELD_VELOCITY
    | FIELD_CONTROLS
    | FIELD_FLAGS
    | FIELD_MODE
    | FIELD_OWNER;

// ============================================================================
// Wire Messages
// ============================================================================

/// Sparse entity-id → changed-field diff set between two ticks.
#[derive(Clone, PartialEq, Message)]
pub struct DeltaPacketProto {
    /// The acknowledged snapshot this delta is relative to.
    #[prost(uint32, tag = "1")]
    pub baseline_tick: u32,

    #[prost(uint32, tag = "2")]
    pub current_tick: u32,

    /// Priority tier this packet was scheduled under (0 critical,
    /// 1 relevant, 2 background).
    #[prost(uint32, tag = "3")]
    pub tier: u32,

    #[prost(message, repeated, tag = "4")]
    pub entries: Vec<DeltaEntryProto>,
}

/// One entity's changed fields.
#[derive(Clone, PartialEq, Message)]
pub struct DeltaEntryProto {
    #[prost(uint32, tag = "1")]
    pub entity_id: u32,

    #[prost(uint32, tag = "2")]
    pub changed_fields: u32,

    /// Little-endian value runs in ascending mask-bit order.
    #[prost(bytes = "vec", tag = "3")]
    pub values: Vec<u8>,
}

// ============================================================================
// Diff / Encode
// ============================================================================

/// Changed-field mask between two states of the same entity.
pub fn diff_mask(base: &EntityState, current: &EntityState) -> u32 {
    let mut mask = 0;
    if base.position != current.position {
        mask |= FIELD_POSITION;
    }
    if base.orientation != current.orientation {
        mask |= FIELD_ORIENTATION;
    }
    if base.velocity != current.velocity {
        mask |= FIELD_VELOCITY;
    }
    if base.controls != current.controls {
        mask |= FIELD_CONTROLS;
    }
    if base.flags != current.flags {
        mask |= FIELD_FLAGS;
    }
    if base.mode != current.mode {
        mask |= FIELD_MODE;
    }
    if base.owner != current.owner {
        mask |= FIELD_OWNER;
    }
    mask
}

fn push_f64s(out: &mut Vec<u8>, values: &[f64]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn encode_values(mask: u32, state: &EntityState) -> Vec<u8> {
    let mut out = Vec::new();
    if mask & FIELD_POSITION != 0 {
        push_f64s(&mut out, &state.position);
    }
    if mask & FIELD_ORIENTATION != 0 {
        push_f64s(&mut out, &state.orientation);
    }
    if mask & FIELD_VELOCITY != 0 {
        push_f64s(&mut out, &state.velocity);
    }
    if mask & FIELD_CONTROLS != 0 {
        push_f64s(&mut out, &state.controls);
    }
    if mask & FIELD_FLAGS != 0 {
        out.extend_from_slice(&state.flags.to_le_bytes());
    }
    if mask & FIELD_MODE != 0 {
        out.extend_from_slice(&u32::from(state.mode).to_le_bytes());
    }
    if mask & FIELD_OWNER != 0 {
        // 0 means "no owner"; otherwise participant id + 1.
        let encoded = state.owner.map_or(0u32, |o| u32::from(o) + 1);
        out.extend_from_slice(&encoded.to_le_bytes());
    }
    out
}

/// Encode a delta of `current` against `baseline`, restricted to
/// `include` entity ids (the AOI distributor's selection for one
/// participant and tier).
///
/// Entities present in `current` but not in `baseline` are sent with a full
/// state mask; entities present in `baseline` but gone from `current` are
/// sent as [`FIELD_REMOVED`]. Unchanged entities produce no entry.
pub fn encode_delta(
    baseline: &Snapshot,
    current: &Snapshot,
    tier: u32,
    include: &[EntityId],
) -> DeltaPacketProto {
    let mut entries = Vec::new();

    for &id in include {
        match (baseline.get(id), current.get(id)) {
            (Some(base), Some(cur)) => {
                let mask = diff_mask(&base.state, &cur.state);
                if mask != 0 {
                    entries.push(DeltaEntryProto {
                        entity_id: id,
                        changed_fields: mask,
                        values: encode_values(mask, &cur.state),
                    });
                }
            }
            (None, Some(cur)) => {
                entries.push(DeltaEntryProto {
                    entity_id: id,
                    changed_fields: FIELD_ALL_STATE,
                    values: encode_values(FIELD_ALL_STATE, &cur.state),
                });
            }
            (Some(_), None) => {
                entries.push(DeltaEntryProto {
                    entity_id: id,
                    changed_fields: FIELD_REMOVED,
                    values: Vec::new(),
                });
            }
            (None, None) => {}
        }
    }

    DeltaPacketProto {
        baseline_tick: baseline.tick,
        current_tick: current.tick,
        tier,
        entries,
    }
}

// ============================================================================
// Decode / Apply
// ============================================================================

struct ValueReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ValueReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take_f64s<const N: usize>(&mut self) -> Result<[f64; N], SyncError> {
        let mut out = [0.0; N];
        for slot in &mut out {
            let end = self.offset + 8;
            let chunk = self
                .bytes
                .get(self.offset..end)
                .ok_or_else(|| SyncError::MalformedPacket("delta values truncated".into()))?;
            // get() returned exactly 8 bytes, so the conversion cannot fail.
            let arr: [u8; 8] = chunk.try_into().unwrap_or([0; 8]);
            *slot = f64::from_le_bytes(arr);
            self.offset = end;
        }
        Ok(out)
    }

    fn take_u32(&mut self) -> Result<u32, SyncError> {
        let end = self.offset + 4;
        let chunk = self
            .bytes
            .get(self.offset..end)
            .ok_or_else(|| SyncError::MalformedPacket("delta values truncated".into()))?;
        let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
        self.offset = end;
        Ok(u32::from_le_bytes(arr))
    }

    fn finish(self) -> Result<(), SyncError> {
        if self.offset == self.bytes.len() {
            Ok(())
        } else {
            Err(SyncError::MalformedPacket(
                "trailing bytes in delta values".into(),
            ))
        }
    }
}

fn apply_entry(state: &mut EntityState, entry: &DeltaEntryProto) -> Result<(), SyncError> {
    let mask = entry.changed_fields;
    let mut reader = ValueReader::new(&entry.values);

    if mask & FIELD_POSITION != 0 {
        state.position = reader.take_f64s::<3>()?;
    }
    if mask & FIELD_ORIENTATION != 0 {
        state.orientation = reader.take_f64s::<4>()?;
    }
    if mask & FIELD_VELOCITY != 0 {
        state.velocity = reader.take_f64s::<3>()?;
    }
    if mask & FIELD_CONTROLS != 0 {
        state.controls = reader.take_f64s::<4>()?;
    }
    if mask & FIELD_FLAGS != 0 {
        state.flags = reader.take_u32()?;
    }
    if mask & FIELD_MODE != 0 {
        let mode = reader.take_u32()?;
        state.mode = u8::try_from(mode)
            .map_err(|_| SyncError::MalformedPacket(format!("mode {mode} out of range")))?;
    }
    if mask & FIELD_OWNER != 0 {
        let raw = reader.take_u32()?;
        state.owner = if raw == 0 {
            None
        } else {
            Some(u16::try_from(raw - 1).map_err(|_| {
                SyncError::MalformedPacket(format!("owner {} out of range", raw - 1))
            })?)
        };
    }
    reader.finish()
}

/// Apply a delta packet to the baseline snapshot it names, producing the
/// state at `current_tick`.
///
/// The caller is responsible for holding the right baseline; a tick mismatch
/// here means the caller's bookkeeping is wrong, and the packet is rejected
/// outright rather than partially applied.
pub fn apply_delta(baseline: &Snapshot, packet: &DeltaPacketProto) -> Result<Snapshot, SyncError> {
    if baseline.tick != packet.baseline_tick {
        return Err(SyncError::MalformedPacket(format!(
            "delta baseline tick {} does not match held snapshot tick {}",
            packet.baseline_tick, baseline.tick
        )));
    }

    let mut entities = baseline.entities.clone();

    for entry in &packet.entries {
        if entry.changed_fields & FIELD_REMOVED != 0 {
            entities.retain(|e| e.id != entry.entity_id);
            continue;
        }
        match entities.iter_mut().find(|e| e.id == entry.entity_id) {
            Some(entity) => apply_entry(&mut entity.state, entry)?,
            None => {
                let mut state = EntityState::default();
                apply_entry(&mut state, entry)?;
                entities.push(Entity {
                    id: entry.entity_id,
                    state,
                });
            }
        }
    }

    Ok(Snapshot::sealed(packet.current_tick as Tick, entities))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: EntityId, x: f64) -> Entity {
        Entity {
            id,
            state: EntityState {
                position: [x, 0.0, 0.0],
                ..EntityState::default()
            },
        }
    }

    fn ids(snapshot: &Snapshot) -> Vec<EntityId> {
        snapshot.entities.iter().map(|e| e.id).collect()
    }

    #[test]
    fn unchanged_entities_produce_no_entries() {
        let base = Snapshot::sealed(10, vec![entity(1, 1.0), entity(2, 2.0)]);
        let mut moved = base.entities.clone();
        moved[0].state.position[0] = 5.0;
        let current = Snapshot::sealed(11, moved);

        let packet = encode_delta(&base, &current, 0, &[1, 2]);
        assert_eq!(packet.entries.len(), 1);
        assert_eq!(packet.entries[0].entity_id, 1);
        assert_eq!(packet.entries[0].changed_fields, FIELD_POSITION);
    }

    #[test]
    fn apply_reconstructs_current_snapshot() {
        let base = Snapshot::sealed(10, vec![entity(1, 1.0), entity(2, 2.0)]);
        let mut next = base.entities.clone();
        next[0].state.position = [3.0, 4.0, 5.0];
        next[0].state.velocity = [1.0, 0.0, 0.0];
        next[1].state.mode = 4;
        next[1].state.owner = Some(7);
        let current = Snapshot::sealed(11, next);

        let packet = encode_delta(&base, &current, 0, &ids(&current));
        let applied = apply_delta(&base, &packet).unwrap();

        assert_eq!(applied, current);
        assert_eq!(applied.hash, current.hash);
    }

    #[test]
    fn spawned_entity_arrives_with_full_state() {
        let base = Snapshot::sealed(10, vec![entity(1, 1.0)]);
        let current = Snapshot::sealed(11, vec![entity(1, 1.0), entity(2, 9.0)]);

        let packet = encode_delta(&base, &current, 0, &[1, 2]);
        let applied = apply_delta(&base, &packet).unwrap();
        assert_eq!(ids(&applied), vec![1, 2]);
        assert_eq!(applied.get(2).unwrap().state.position[0], 9.0);
    }

    #[test]
    fn removed_entity_is_dropped() {
        let base = Snapshot::sealed(10, vec![entity(1, 1.0), entity(2, 2.0)]);
        let current = Snapshot::sealed(11, vec![entity(1, 1.0)]);

        let packet = encode_delta(&base, &current, 0, &[1, 2]);
        let applied = apply_delta(&base, &packet).unwrap();
        assert_eq!(ids(&applied), vec![1]);
    }

    #[test]
    fn wrong_baseline_rejected_without_partial_application() {
        let base = Snapshot::sealed(10, vec![entity(1, 1.0)]);
        let current = Snapshot::sealed(11, vec![entity(1, 2.0)]);
        let packet = encode_delta(&base, &current, 0, &[1]);

        let other_base = Snapshot::sealed(9, vec![entity(1, 1.0)]);
        let err = apply_delta(&other_base, &packet).unwrap_err();
        assert!(matches!(err, SyncError::MalformedPacket(_)));
    }

    #[test]
    fn truncated_values_are_malformed() {
        let base = Snapshot::sealed(10, vec![entity(1, 1.0)]);
        let current = Snapshot::sealed(11, vec![entity(1, 2.0)]);
        let mut packet = encode_delta(&base, &current, 0, &[1]);
        packet.entries[0].values.truncate(4);

        assert!(matches!(
            apply_delta(&base, &packet),
            Err(SyncError::MalformedPacket(_))
        ));
    }

    #[test]
    fn trailing_values_are_malformed() {
        let base = Snapshot::sealed(10, vec![entity(1, 1.0)]);
        let current = Snapshot::sealed(11, vec![entity(1, 2.0)]);
        let mut packet = encode_delta(&base, &current, 0, &[1]);
        packet.entries[0].values.extend_from_slice(&[0u8; 3]);

        assert!(matches!(
            apply_delta(&base, &packet),
            Err(SyncError::MalformedPacket(_))
        ));
    }

    #[test]
    fn owner_clear_roundtrips() {
        let mut owned = entity(1, 0.0);
        owned.state.owner = Some(5);
        let base = Snapshot::sealed(10, vec![owned]);
        let current = Snapshot::sealed(11, vec![entity(1, 0.0)]);

        let packet = encode_delta(&base, &current, 0, &[1]);
        assert_eq!(packet.entries[0].changed_fields, FIELD_OWNER);
        let applied = apply_delta(&base, &packet).unwrap();
        assert_eq!(applied.get(1).unwrap().state.owner, None);
    }

    #[test]
    fn packet_roundtrips_through_prost() {
        let base = Snapshot::sealed(10, vec![entity(1, 1.0)]);
        let current = Snapshot::sealed(11, vec![entity(1, 2.0), entity(3, 3.0)]);
        let packet = encode_delta(&base, &current, 2, &[1, 3]);

        let bytes = packet.encode_to_vec();
        let decoded = DeltaPacketProto::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(apply_delta(&base, &decoded).unwrap(), current);
    }
}
