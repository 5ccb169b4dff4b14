//! Immutable per-tick world state.
//!
//! The canonical `Snapshot` is a value: the reconciler produces a new sealed
//! snapshot each tick rather than mutating a shared one in place. Entities
//! are held in a flat arena sorted by id ascending, so snapshots serialize,
//! diff, and hash without chasing references.

use crate::{EntityId, ParticipantId, Tick};

// ============================================================================
// Entity State
// ============================================================================

/// Full replicated state of one entity.
///
/// Continuous fields are `f64` so the digest canonicalization rules apply
/// uniformly; discrete fields are plain integers. `owner` is the participant
/// currently holding primary control, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub position: [f64; 3],
    /// Orientation quaternion, `[w, x, y, z]`.
    pub orientation: [f64; 4],
    pub velocity: [f64; 3],
    /// Control surface values indexed by [`crate::ControlAxis`].
    pub controls: [f64; 4],
    /// Discrete status flags (landing gear, lights, ...), bit-packed.
    pub flags: u32,
    /// Current discrete operating mode.
    pub mode: u8,
    pub owner: Option<ParticipantId>,
}

impl Default for EntityState {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [1.0, 0.0, 0.0, 0.0],
            velocity: [0.0; 3],
            controls: [0.0; 4],
            flags: 0,
            mode: 0,
            owner: None,
        }
    }
}

impl EntityState {
    /// True when every continuous field is a finite number.
    ///
    /// The reconciler checks this after each step; an entity that fails is
    /// reverted to its prior-tick value instead of corrupting the snapshot.
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.orientation.iter().all(|v| v.is_finite())
            && self.velocity.iter().all(|v| v.is_finite())
            && self.controls.iter().all(|v| v.is_finite())
    }
}

/// An entity record in the snapshot arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub state: EntityState,
}

// ============================================================================
// Snapshot
// ============================================================================

/// The state of the whole session world at one tick.
///
/// Exactly one canonical snapshot exists per tick, produced by the authority.
/// All other copies (client predictions) are provisional and must converge
/// to it. `entities` is sorted by id ascending; `hash` is the state digest
/// over the sorted arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub tick: Tick,
    pub entities: Vec<Entity>,
    pub hash: u64,
}

impl Snapshot {
    /// Seal a snapshot: sort the arena by entity id and compute the digest.
    ///
    /// This is the only way to construct a `Snapshot`, so a held snapshot's
    /// hash is always consistent with its contents.
    pub fn sealed(tick: Tick, mut entities: Vec<Entity>) -> Self {
        entities.sort_by_key(|e| e.id);
        entities.dedup_by_key(|e| e.id);
        let hash = state_digest(tick, &entities);
        Self {
            tick,
            entities,
            hash,
        }
    }

    /// Empty world at the given tick.
    pub fn empty(tick: Tick) -> Self {
        Self::sealed(tick, Vec::new())
    }

    /// Look up an entity by id (binary search over the sorted arena).
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|i| &self.entities[i])
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }
}

// ============================================================================
// State Digest
// ============================================================================

const FNV1A_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

/// FNV-1a 64-bit hasher used for the snapshot digest.
#[derive(Debug, Clone)]
struct Fnv1a64 {
    state: u64,
}

impl Fnv1a64 {
    fn new() -> Self {
        Self {
            state: FNV1A_OFFSET_BASIS,
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV1A_PRIME);
        }
    }

    fn finish(self) -> u64 {
        self.state
    }
}

/// Canonicalize an f64 for hashing: `-0.0` folds to `+0.0` and every NaN
/// folds to the quiet-NaN bit pattern, so digests are machine-independent.
fn canonicalize_f64(value: f64) -> u64 {
    const QUIET_NAN_BITS: u64 = 0x7ff8000000000000;

    if value.is_nan() {
        QUIET_NAN_BITS
    } else if value == 0.0 {
        0u64
    } else {
        value.to_bits()
    }
}

/// Digest of a sorted entity arena at a tick.
///
/// Fields are fed little-endian in a fixed order; two snapshots with equal
/// digests are treated as identical by reconciliation and desync detection.
pub fn state_digest(tick: Tick, entities: &[Entity]) -> u64 {
    let mut hasher = Fnv1a64::new();
    hasher.update(&tick.to_le_bytes());

    for entity in entities {
        hasher.update(&entity.id.to_le_bytes());
        let s = &entity.state;
        for v in s.position {
            hasher.update(&canonicalize_f64(v).to_le_bytes());
        }
        for v in s.orientation {
            hasher.update(&canonicalize_f64(v).to_le_bytes());
        }
        for v in s.velocity {
            hasher.update(&canonicalize_f64(v).to_le_bytes());
        }
        for v in s.controls {
            hasher.update(&canonicalize_f64(v).to_le_bytes());
        }
        hasher.update(&s.flags.to_le_bytes());
        hasher.update(&[s.mode]);
        match s.owner {
            Some(owner) => {
                hasher.update(&[1]);
                hasher.update(&owner.to_le_bytes());
            }
            None => hasher.update(&[0]),
        }
    }

    hasher.finish()
}

// ============================================================================
// Tests
// ============================================================================
