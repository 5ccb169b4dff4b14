//! driftsync deterministic core
//!
//! This crate contains the shared state model for the synchronization core:
//! the immutable per-tick snapshot, the command model, the configuration
//! surface, the error taxonomy, and the step-function seam through which an
//! external physics model is consumed.
//!
//! # Architecture constraints
//!
//! Everything in this crate MUST be deterministic and side-effect-free:
//! no I/O, no wall-clock reads, no ambient randomness. Reconciling the same
//! ordered command set against the same snapshot on any machine must produce
//! a bit-identical successor snapshot. The session and client crates depend
//! on that property for rollback, replay, and failover.

#![deny(unsafe_code)]

pub mod command;
pub mod config;
pub mod error;
pub mod snapshot;
pub mod step;

pub use command::{CommandPayload, ControlAxis, InputCommand, ResolvedCommand};
pub use config::SyncConfig;
pub use error::SyncError;
pub use snapshot::{Entity, EntityState, Snapshot};
pub use step::{KinematicStep, StepFunction};

// ============================================================================
// Type Aliases
// ============================================================================

/// A single discrete simulation timestep; the atomic unit of session time.
pub type Tick = u32;

/// Stable identifier for a session participant.
pub type ParticipantId = u16;

/// Unique identifier for an entity within a session.
///
/// Entities live in a flat arena keyed by this id; all relationships
/// (ownership included) are id-to-id lookups, never embedded references.
pub type EntityId = u32;

/// Per-participant monotonically increasing command sequence number.
pub type Seq = u32;

/// Static per-session authority rank. Lower is stronger: the host is rank 0,
/// later joiners take ranks in join order. Used as the deterministic
/// tie-breaker for command ordering and conflict resolution.
pub type AuthorityRank = u16;
