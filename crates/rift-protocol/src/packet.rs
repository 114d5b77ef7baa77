//! Packet registry and codec.
//!
//! Every packet serializes as a one-byte type tag followed by the packet's
//! postcard-encoded body:
//!
//! ```text
//! +-----------+----------------------------+
//! | tag (1B)  |  body (postcard, 0+ bytes) |
//! +-----------+----------------------------+
//! ```
//!
//! The stream transport wraps this in a 4-byte length frame; the datagram
//! transport sends it raw, which is why receivers can cheaply discard noise
//! by checking whether the first byte is a known tag. [`PacketKind`] is the
//! registry: `from_u8` is the constructor lookup, and an unrecognized tag
//! decodes to [`PacketError::UnknownKind`] — callers log and carry on, the
//! connection is not killed for a single bad frame (except during the
//! handshake, where the transport layer treats it as fatal).

use serde::{Deserialize, Serialize};

use crate::command::NetCommand;
use crate::ids::{ClientId, EntityKindId, NetworkId, SceneEpoch, SceneKey, Tick};

// ---------------------------------------------------------------------------
// PacketKind
// ---------------------------------------------------------------------------

/// One-byte packet type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Client → server, first frame on a fresh stream.
    ConnectionRequest = 1,
    /// Server → client, completes the handshake.
    ConnectionAccept = 2,
    /// Either direction, graceful teardown notice.
    Disconnect = 3,
    /// Either direction, chat text.
    Chat = 4,
    /// Client → server, batched inputs.
    Command = 5,
    /// Server → clients, authoritative state (datagram only).
    Snapshot = 6,
    /// Server → clients, scene switch notice.
    SceneChange = 7,
    /// Client → server keep-alive; encodes to exactly one byte.
    KeepAlive = 8,
}

impl PacketKind {
    /// Looks up a tag byte. Returns `None` for unknown values, which lets
    /// datagram receivers drop garbage without attempting a body decode.
    pub fn from_u8(tag: u8) -> Option<PacketKind> {
        Some(match tag {
            1 => PacketKind::ConnectionRequest,
            2 => PacketKind::ConnectionAccept,
            3 => PacketKind::Disconnect,
            4 => PacketKind::Chat,
            5 => PacketKind::Command,
            6 => PacketKind::Snapshot,
            7 => PacketKind::SceneChange,
            8 => PacketKind::KeepAlive,
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

/// Opens the handshake on a fresh stream connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionRequest {
    /// Display name of the joining player.
    pub client_name: String,
    /// The UDP port the client bound locally; combined with the stream's
    /// remote IP this becomes the client's datagram endpoint on the server.
    pub udp_port: u16,
}

/// Completes the handshake. Only after this does either side treat the
/// client as joined.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionAccept {
    /// The id allocated for this client; never reused by this server.
    pub client_id: ClientId,
    /// The server's datagram port.
    pub server_udp_port: u16,
    /// Scene epoch the authority is currently in.
    pub scene_epoch: SceneEpoch,
    /// Key of the authority's current scene.
    pub scene_key: SceneKey,
}

/// Graceful teardown notice, either direction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Disconnect {
    /// Human-readable reason.
    pub reason: String,
}

/// Chat text. The server enforces `sender` on relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Chat {
    /// Issuing client (`ClientId::SERVER` for server notices).
    pub sender: ClientId,
    /// Message text.
    pub text: String,
}

/// Batched client inputs, reliable channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommandBatch {
    /// Issuing client. The authority trusts the connection's registered id
    /// and overrides a mismatching field.
    pub client_id: ClientId,
    /// Commands in ascending sequence order.
    pub commands: Vec<NetCommand>,
}

/// Point-in-time serialization of one replicated entity and its replicated
/// descendants.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReplicatedObjectData {
    /// Concrete type, keys the receiving side's constructor registry.
    pub kind: EntityKindId,
    /// Instance identity within the scene.
    pub network_id: NetworkId,
    /// Owning client (`ClientId::SERVER` for environment-owned).
    pub owner: ClientId,
    /// Registered properties in index order, fixed-layout encoded.
    pub properties: Vec<u8>,
    /// Replicated children, recursively.
    pub children: Vec<ReplicatedObjectData>,
}

/// Full authoritative state at one server tick, unreliable channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Server tick the state was captured at.
    pub tick: Tick,
    /// Epoch of the scene that produced this state.
    pub scene_epoch: SceneEpoch,
    /// Per-client command high-water marks: the highest sequence the
    /// authority has applied for each client.
    pub last_processed: Vec<(ClientId, u32)>,
    /// The replicated entity trees, top-level entities first.
    pub objects: Vec<ReplicatedObjectData>,
}

impl Snapshot {
    /// The high-water mark reported for `client`, if any.
    pub fn processed_for(&self, client: ClientId) -> Option<u32> {
        self.last_processed
            .iter()
            .find(|(id, _)| *id == client)
            .map(|(_, seq)| *seq)
    }
}

/// Authority scene-switch notice, reliable channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SceneChange {
    /// Epoch of the new scene.
    pub scene_epoch: SceneEpoch,
    /// Key of the new scene.
    pub scene_key: SceneKey,
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A decoded packet of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// See [`ConnectionRequest`].
    ConnectionRequest(ConnectionRequest),
    /// See [`ConnectionAccept`].
    ConnectionAccept(ConnectionAccept),
    /// See [`Disconnect`].
    Disconnect(Disconnect),
    /// See [`Chat`].
    Chat(Chat),
    /// See [`CommandBatch`].
    Command(CommandBatch),
    /// See [`Snapshot`].
    Snapshot(Snapshot),
    /// See [`SceneChange`].
    SceneChange(SceneChange),
    /// Body-less keep-alive.
    KeepAlive,
}

/// Errors produced while decoding a packet.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// Zero-length payload — not even a tag byte.
    #[error("empty packet payload")]
    Empty,

    /// The tag byte is not a registered packet kind.
    #[error("unknown packet tag {0:#04x}")]
    UnknownKind(u8),

    /// The body failed to decode for the tagged kind.
    #[error("malformed packet body: {0}")]
    Body(#[from] postcard::Error),

    /// A body-less packet carried trailing bytes.
    #[error("unexpected {0} trailing bytes")]
    TrailingBytes(usize),
}

impl Packet {
    /// The tag this packet serializes under.
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::ConnectionRequest(_) => PacketKind::ConnectionRequest,
            Packet::ConnectionAccept(_) => PacketKind::ConnectionAccept,
            Packet::Disconnect(_) => PacketKind::Disconnect,
            Packet::Chat(_) => PacketKind::Chat,
            Packet::Command(_) => PacketKind::Command,
            Packet::Snapshot(_) => PacketKind::Snapshot,
            Packet::SceneChange(_) => PacketKind::SceneChange,
            Packet::KeepAlive => PacketKind::KeepAlive,
        }
    }

    /// Serializes to `[tag][postcard body]`. [`Packet::KeepAlive`] encodes
    /// to its tag byte alone.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.kind() as u8];
        let body = match self {
            Packet::ConnectionRequest(b) => postcard::to_allocvec(b),
            Packet::ConnectionAccept(b) => postcard::to_allocvec(b),
            Packet::Disconnect(b) => postcard::to_allocvec(b),
            Packet::Chat(b) => postcard::to_allocvec(b),
            Packet::Command(b) => postcard::to_allocvec(b),
            Packet::Snapshot(b) => postcard::to_allocvec(b),
            Packet::SceneChange(b) => postcard::to_allocvec(b),
            Packet::KeepAlive => Ok(Vec::new()),
        };
        // Postcard cannot fail on these in-memory types.
        out.extend(body.expect("packet body serialization"));
        out
    }

    /// Decodes a tagged payload.
    pub fn from_bytes(data: &[u8]) -> Result<Packet, PacketError> {
        let (&tag, body) = data.split_first().ok_or(PacketError::Empty)?;
        let kind = PacketKind::from_u8(tag).ok_or(PacketError::UnknownKind(tag))?;
        Ok(match kind {
            PacketKind::ConnectionRequest => {
                Packet::ConnectionRequest(postcard::from_bytes(body)?)
            }
            PacketKind::ConnectionAccept => Packet::ConnectionAccept(postcard::from_bytes(body)?),
            PacketKind::Disconnect => Packet::Disconnect(postcard::from_bytes(body)?),
            PacketKind::Chat => Packet::Chat(postcard::from_bytes(body)?),
            PacketKind::Command => Packet::Command(postcard::from_bytes(body)?),
            PacketKind::Snapshot => Packet::Snapshot(postcard::from_bytes(body)?),
            PacketKind::SceneChange => Packet::SceneChange(postcard::from_bytes(body)?),
            PacketKind::KeepAlive => {
                if !body.is_empty() {
                    return Err(PacketError::TrailingBytes(body.len()));
                }
                Packet::KeepAlive
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
