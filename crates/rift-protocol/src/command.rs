//! Net commands: client inputs stamped for ordered, idempotent application
//! on the authority.

use serde::{Deserialize, Serialize};

use crate::ids::Tick;

/// What a client wants its avatar to do for one tick. The replication layer
/// routes the payload to the issuing client's avatar entity; interpreting it
/// is gameplay's job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum CommandPayload {
    /// Displace the avatar by a per-tick delta.
    Move {
        /// X displacement for this tick.
        dx: f32,
        /// Y displacement for this tick.
        dy: f32,
    },

    /// Turn the avatar to face one of the byte-encoded directions.
    Face {
        /// Direction discriminant, gameplay-defined.
        direction: u8,
    },

    /// Trigger a gameplay action bound to a slot (use item, interact, …).
    Action {
        /// Action slot discriminant, gameplay-defined.
        slot: u8,
    },
}

/// A single client input on the wire.
///
/// `sequence` is per-client, monotonically increasing, assigned by the
/// issuing client, and never reused. The authority applies commands in
/// ascending sequence order and drops anything at or below its per-client
/// high-water mark, which makes retransmitted or duplicated batches
/// harmless. A command stays *pending* on the client until a snapshot
/// reports it processed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetCommand {
    /// Per-client monotonic sequence number.
    pub sequence: u32,
    /// Client tick at which the command was generated.
    pub tick: Tick,
    /// The input itself.
    pub payload: CommandPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_roundtrip() {
        let cmd = NetCommand {
            sequence: 17,
            tick: 900,
            payload: CommandPayload::Move { dx: 1.5, dy: -0.25 },
        };
        let bytes = postcard::to_allocvec(&cmd).unwrap();
        let decoded: NetCommand = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_payload_variants_roundtrip() {
        for payload in [
            CommandPayload::Move { dx: 0.0, dy: 0.0 },
            CommandPayload::Face { direction: 3 },
            CommandPayload::Action { slot: 250 },
        ] {
            let bytes = postcard::to_allocvec(&payload).unwrap();
            let decoded: CommandPayload = postcard::from_bytes(&bytes).unwrap();
            assert_eq!(decoded, payload);
        }
    }
}
