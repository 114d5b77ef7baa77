//! Wire protocol for the Rift replication layer: identifier newtypes, the
//! fixed-layout property codec, the ordered property registry, the one-byte
//! tagged packet codec, and net command types.
//!
//! Everything in this crate is transport-agnostic: `rift-net` moves these
//! bytes, `rift-replication` decides what they mean.

pub mod command;
pub mod ids;
pub mod packet;
pub mod property;
pub mod wire;

pub use command::{CommandPayload, NetCommand};
pub use ids::{ClientId, EntityKindId, NetworkId, SceneEpoch, SceneKey, Tick, Vec2};
pub use packet::{
    Chat, CommandBatch, ConnectionAccept, ConnectionRequest, Disconnect, Packet, PacketError,
    PacketKind, ReplicatedObjectData, SceneChange, Snapshot,
};
pub use property::{Property, PropertyKind, PropertySet, PropertyValue};
pub use wire::{WireError, WireReader, WireWriter};
