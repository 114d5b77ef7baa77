//! Authoritative-server, client-predicted state replication.
//!
//! The pieces, leaf to root: the [`Replicated`] entity trait and its
//! constructor registry, the [`Scene`] tree of entities, snapshot capture
//! and the full-replace merge, the pending-command buffer, the
//! client/authority synchronization steps, and the [`SessionDriver`] state
//! machine that wires all of it to the transport for singleplayer, host,
//! and client play.

pub mod entity;
pub mod pending;
pub mod scene;
pub mod session;
pub mod snapshot;
pub mod sync;

pub use entity::{EntityRegistry, Replicated};
pub use pending::{PendingCommands, SequenceTracker};
pub use scene::{Scene, SceneError, SceneEvent, SceneNode};
pub use session::{
    GameHooks, SessionConfig, SessionDriver, SessionError, SessionEvent, SessionKind,
};
pub use snapshot::{MergeReport, apply_snapshot, capture_scene};
pub use sync::{AuthoritySync, ClientSync, SnapshotOutcome};
