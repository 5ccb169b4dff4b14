//! driftsync wire protocol types
//!
//! Shared Protobuf message types for communication between participants.
//! Authority and client crates both depend on this crate so the schema can
//! never skew between the two ends.
//!
//! # Message categories
//!
//! - **Reliable-ordered channel**: input commands, authority changes, resync
//!   requests, full snapshots, clock pings/pongs.
//! - **Unreliable-unordered channel**: delta packets and heartbeats, tolerant
//!   of loss.
//!
//! The transport itself (encryption, congestion control, retransmission) is
//! an external collaborator; this crate only fixes the bytes.

#![deny(unsafe_code)]

pub mod delta;

use driftsync_core::{
    CommandPayload, ControlAxis, Entity, EntityState, InputCommand, Snapshot, SyncError,
};
use prost::Message;

pub use delta::{
    DeltaEntryProto, DeltaPacketProto, FIELD_CONTROLS, FIELD_FLAGS, FIELD_MODE, FIELD_ORIENTATION,
    FIELD_OWNER, FIELD_POSITION, FIELD_REMOVED, FIELD_VELOCITY, apply_delta, diff_mask,
    encode_delta,
};

// ============================================================================
// Reliable Channel Messages
// ============================================================================

/// A control command from one participant, targeting a logical tick.
#[derive(Clone, PartialEq, Message)]
pub struct InputCommandProto {
    #[prost(uint32, tag = "1")]
    pub participant_id: u32,

    /// Per-participant monotonically increasing sequence number; the
    /// replay-protection key.
    #[prost(uint32, tag = "2")]
    pub sequence: u32,

    /// Logical tick this command targets.
    #[prost(uint32, tag = "3")]
    pub target_tick: u32,

    /// Send time on the sender's clock, microseconds.
    #[prost(uint64, tag = "4")]
    pub timestamp: u64,

    /// Encoded [`CommandPayloadProto`].
    #[prost(bytes = "vec", tag = "5")]
    pub payload: Vec<u8>,
}

/// The closed payload variant set, flattened for the wire.
///
/// `kind` selects the variant; unused fields stay at their defaults.
#[derive(Clone, PartialEq, Message)]
pub struct CommandPayloadProto {
    /// 1 = axis input, 2 = take control, 3 = mode switch.
    #[prost(uint32, tag = "1")]
    pub kind: u32,

    #[prost(uint32, tag = "2")]
    pub entity_id: u32,

    /// Axis slot index, for kind = 1.
    #[prost(uint32, tag = "3")]
    pub axis: u32,

    /// Axis value, for kind = 1.
    #[prost(double, tag = "4")]
    pub value: f64,

    /// Target mode, for kind = 3.
    #[prost(uint32, tag = "5")]
    pub mode: u32,
}

pub const PAYLOAD_KIND_AXIS: u32 = 1;
pub const PAYLOAD_KIND_TAKE_CONTROL: u32 = 2;
pub const PAYLOAD_KIND_MODE_SWITCH: u32 = 3;

/// Notification that simulation authority moved to a new participant.
#[derive(Clone, PartialEq, Message)]
pub struct AuthorityChangedProto {
    #[prost(uint32, tag = "1")]
    pub new_authority: u32,

    /// The last tick every surviving follower had acknowledged; the new
    /// authority resumes reconciliation from here.
    #[prost(uint32, tag = "2")]
    pub resume_tick: u32,
}

/// Client request for a full state resynchronization.
///
/// Sent when a delta's baseline is not held, or after repeated desyncs.
#[derive(Clone, PartialEq, Message)]
pub struct ResyncRequestProto {
    #[prost(uint32, tag = "1")]
    pub participant_id: u32,

    /// Newest tick the requester still holds, 0 if none.
    #[prost(uint32, tag = "2")]
    pub last_known_tick: u32,
}

/// Complete snapshot serialization, keyed by tick. Answers a resync request
/// and seeds newly joined participants.
#[derive(Clone, PartialEq, Message)]
pub struct FullSnapshotProto {
    #[prost(uint32, tag = "1")]
    pub tick: u32,

    /// Entity states, ordered by entity id ascending.
    #[prost(message, repeated, tag = "2")]
    pub entities: Vec<EntityProto>,

    /// State digest at this tick.
    #[prost(uint64, tag = "3")]
    pub hash: u64,
}

/// Full replicated state of one entity.
#[derive(Clone, PartialEq, Message)]
pub struct EntityProto {
    #[prost(uint32, tag = "1")]
    pub entity_id: u32,

    /// Position `[x, y, z]`.
    #[prost(double, repeated, tag = "2")]
    pub position: Vec<f64>,

    /// Orientation quaternion `[w, x, y, z]`.
    #[prost(double, repeated, tag = "3")]
    pub orientation: Vec<f64>,

    /// Velocity `[vx, vy, vz]`.
    #[prost(double, repeated, tag = "4")]
    pub velocity: Vec<f64>,

    /// Control surface values.
    #[prost(double, repeated, tag = "5")]
    pub controls: Vec<f64>,

    #[prost(uint32, tag = "6")]
    pub flags: u32,

    #[prost(uint32, tag = "7")]
    pub mode: u32,

    #[prost(uint32, optional, tag = "8")]
    pub owner: Option<u32>,
}

/// Clock synchronization ping.
#[derive(Clone, PartialEq, Message)]
pub struct ClockPingProto {
    /// Sender-side timestamp, microseconds; echoed back verbatim.
    #[prost(uint64, tag = "1")]
    pub sent_timestamp: u64,
}

/// Clock synchronization pong.
#[derive(Clone, PartialEq, Message)]
pub struct ClockPongProto {
    /// Authority tick at time of response.
    #[prost(uint32, tag = "1")]
    pub server_tick: u32,

    /// Authority-side timestamp, microseconds.
    #[prost(uint64, tag = "2")]
    pub server_timestamp: u64,

    /// Echo of the ping's sent timestamp.
    #[prost(uint64, tag = "3")]
    pub ping_timestamp_echo: u64,
}

// ============================================================================
// Unreliable Channel Messages
// ============================================================================

/// Authority liveness beacon with the current canonical digest.
#[derive(Clone, PartialEq, Message)]
pub struct HeartbeatProto {
    #[prost(uint32, tag = "1")]
    pub participant_id: u32,

    #[prost(uint32, tag = "2")]
    pub tick: u32,

    #[prost(uint64, tag = "3")]
    pub snapshot_hash: u64,
}

// DeltaPacketProto / DeltaEntryProto live in `delta`.

// ============================================================================
// Payload Conversions
// ============================================================================

impl From<&CommandPayload> for CommandPayloadProto {
    fn from(payload: &CommandPayload) -> Self {
        match *payload {
            CommandPayload::Axis {
                entity,
                axis,
                value,
            } => Self {
                kind: PAYLOAD_KIND_AXIS,
                entity_id: entity,
                axis: axis.index() as u32,
                value,
                mode: 0,
            },
            CommandPayload::TakeControl { entity } => Self {
                kind: PAYLOAD_KIND_TAKE_CONTROL,
                entity_id: entity,
                axis: 0,
                value: 0.0,
                mode: 0,
            },
            CommandPayload::ModeSwitch { entity, mode } => Self {
                kind: PAYLOAD_KIND_MODE_SWITCH,
                entity_id: entity,
                axis: 0,
                value: 0.0,
                mode: u32::from(mode),
            },
        }
    }
}

impl TryFrom<CommandPayloadProto> for CommandPayload {
    type Error = SyncError;

    fn try_from(proto: CommandPayloadProto) -> Result<Self, Self::Error> {
        match proto.kind {
            PAYLOAD_KIND_AXIS => {
                let axis = ControlAxis::from_index(proto.axis as usize).ok_or_else(|| {
                    SyncError::MalformedPacket(format!("unknown control axis {}", proto.axis))
                })?;
                Ok(CommandPayload::Axis {
                    entity: proto.entity_id,
                    axis,
                    value: proto.value,
                })
            }
            PAYLOAD_KIND_TAKE_CONTROL => Ok(CommandPayload::TakeControl {
                entity: proto.entity_id,
            }),
            PAYLOAD_KIND_MODE_SWITCH => {
                let mode = u8::try_from(proto.mode).map_err(|_| {
                    SyncError::MalformedPacket(format!("mode {} out of range", proto.mode))
                })?;
                Ok(CommandPayload::ModeSwitch {
                    entity: proto.entity_id,
                    mode,
                })
            }
            other => Err(SyncError::MalformedPacket(format!(
                "unknown payload kind {other}"
            ))),
        }
    }
}

impl From<&InputCommand> for InputCommandProto {
    fn from(cmd: &InputCommand) -> Self {
        Self {
            participant_id: u32::from(cmd.participant),
            sequence: cmd.seq,
            target_tick: cmd.target_tick,
            timestamp: cmd.timestamp_us,
            payload: CommandPayloadProto::from(&cmd.payload).encode_to_vec(),
        }
    }
}

impl TryFrom<InputCommandProto> for InputCommand {
    type Error = SyncError;

    fn try_from(proto: InputCommandProto) -> Result<Self, Self::Error> {
        let participant = u16::try_from(proto.participant_id).map_err(|_| {
            SyncError::MalformedPacket(format!(
                "participant id {} out of range",
                proto.participant_id
            ))
        })?;
        let payload = CommandPayloadProto::decode(proto.payload.as_slice())
            .map_err(|e| SyncError::MalformedPacket(format!("payload decode: {e}")))?;
        Ok(Self {
            participant,
            seq: proto.sequence,
            target_tick: proto.target_tick,
            timestamp_us: proto.timestamp,
            payload: payload.try_into()?,
        })
    }
}

// ============================================================================
// Snapshot Conversions
// ============================================================================

impl From<&Entity> for EntityProto {
    fn from(entity: &Entity) -> Self {
        let s = &entity.state;
        Self {
            entity_id: entity.id,
            position: s.position.to_vec(),
            orientation: s.orientation.to_vec(),
            velocity: s.velocity.to_vec(),
            controls: s.controls.to_vec(),
            flags: s.flags,
            mode: u32::from(s.mode),
            owner: s.owner.map(u32::from),
        }
    }
}

fn fixed<const N: usize>(values: &[f64], field: &'static str) -> Result<[f64; N], SyncError> {
    <[f64; N]>::try_from(values)
        .map_err(|_| SyncError::MalformedPacket(format!("{field} must have {N} elements")))
}

impl TryFrom<EntityProto> for Entity {
    type Error = SyncError;

    fn try_from(proto: EntityProto) -> Result<Self, Self::Error> {
        let owner = proto
            .owner
            .map(|o| {
                u16::try_from(o)
                    .map_err(|_| SyncError::MalformedPacket(format!("owner {o} out of range")))
            })
            .transpose()?;
        let mode = u8::try_from(proto.mode)
            .map_err(|_| SyncError::MalformedPacket(format!("mode {} out of range", proto.mode)))?;
        Ok(Self {
            id: proto.entity_id,
            state: EntityState {
                position: fixed::<3>(&proto.position, "position")?,
                orientation: fixed::<4>(&proto.orientation, "orientation")?,
                velocity: fixed::<3>(&proto.velocity, "velocity")?,
                controls: fixed::<4>(&proto.controls, "controls")?,
                flags: proto.flags,
                mode,
                owner,
            },
        })
    }
}

impl From<&Snapshot> for FullSnapshotProto {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            tick: snapshot.tick,
            entities: snapshot.entities.iter().map(Into::into).collect(),
            hash: snapshot.hash,
        }
    }
}

impl TryFrom<FullSnapshotProto> for Snapshot {
    type Error = SyncError;

    fn try_from(proto: FullSnapshotProto) -> Result<Self, Self::Error> {
        let entities: Result<Vec<_>, _> =
            proto.entities.into_iter().map(TryInto::try_into).collect();
        let snapshot = Snapshot::sealed(proto.tick, entities?);
        // A full snapshot whose digest does not match its contents was
        // corrupted somewhere; applying it would poison reconciliation.
        if snapshot.hash != proto.hash {
            return Err(SyncError::MalformedPacket(format!(
                "full snapshot hash mismatch at tick {}",
                proto.tick
            )));
        }
        Ok(snapshot)
    }
}

// ============================================================================
// Tests
// ============================================================================
