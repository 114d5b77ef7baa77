//! The synchronization steps of the replication protocol, independent of
//! any socket: authoritative command ingestion on the server side, and
//! prediction, epoch gating, and reconciliation on the client side.
//!
//! `rift-net` moves the packets; [`crate::session`] wires these steps to
//! the transport. Keeping them separate makes every protocol property
//! testable without a network.

use rift_protocol::{
    ClientId, CommandBatch, CommandPayload, SceneChange, Snapshot, Tick,
};

use crate::entity::EntityRegistry;
use crate::pending::{PendingCommands, SequenceTracker};
use crate::scene::Scene;
use crate::snapshot::{MergeError, MergeReport, apply_snapshot};

// ---------------------------------------------------------------------------
// Authority side
// ---------------------------------------------------------------------------

/// Authority-side command processing: applies fresh commands in ascending
/// sequence order and drops everything at or below the per-client
/// high-water mark, so retransmitted or duplicated batches are harmless.
#[derive(Debug, Default)]
pub struct AuthoritySync {
    tracker: SequenceTracker,
}

impl AuthoritySync {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests one command batch from `from`.
    ///
    /// `already_applied` marks the host's own embedded client: its
    /// commands were applied to the shared scene the moment they were
    /// predicted, so the authority only advances the high-water mark.
    /// The batch's `client_id` field is untrusted; the connection's
    /// registered id decides.
    ///
    /// Returns the number of commands accepted.
    pub fn ingest_batch(
        &mut self,
        scene: &mut Scene,
        from: ClientId,
        batch: &CommandBatch,
        already_applied: bool,
    ) -> usize {
        if batch.client_id != from {
            tracing::debug!(
                "batch claims {} but arrived from {from}, overriding",
                batch.client_id
            );
        }

        let mut commands: Vec<_> = batch.commands.iter().collect();
        commands.sort_by_key(|c| c.sequence);

        let mut accepted = 0;
        for command in commands {
            if !self.tracker.observe(from, command.sequence) {
                continue; // duplicate or reordered straggler
            }
            if !already_applied {
                scene.apply_command(from, &command.payload);
            }
            accepted += 1;
        }
        accepted
    }

    /// The per-client high-water map carried in snapshots.
    pub fn report(&self) -> Vec<(ClientId, u32)> {
        self.tracker.report()
    }

    /// The mark for one client.
    pub fn processed(&self, client: ClientId) -> u32 {
        self.tracker.processed(client)
    }

    /// Drops a departed client's mark.
    pub fn forget(&mut self, client: ClientId) {
        self.tracker.forget(client);
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// What a received snapshot did.
#[derive(Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Same epoch: merged, trimmed, and replayed.
    Applied(MergeReport),
    /// Same epoch, embedded host client: pending list trimmed, nothing
    /// re-applied — the host already applied its own commands directly.
    TrimmedOnly,
    /// Newer epoch: buffered until our scene switch catches up.
    Buffered,
    /// Older epoch: dropped.
    StaleEpoch,
    /// Same epoch but at or before the last applied server tick
    /// (datagram reordering): dropped, the newer state already won.
    StaleTick,
}

/// What a received scene-change notice requires of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneChangeAction {
    /// Older or already-current epoch: nothing.
    Ignore,
    /// Embedded host client: predicted state cleared, but the shared
    /// scene was already switched by the authority.
    ClearedOnly,
    /// Remote client: rebuild the scene for the new epoch.
    Switch,
}

/// Client-side prediction and reconciliation state.
pub struct ClientSync {
    my_id: ClientId,
    embedded: bool,
    pending: PendingCommands,
    buffered: Option<Snapshot>,
    last_server_tick: Tick,
}

impl ClientSync {
    /// Creates sync state for the client `my_id`. `embedded` marks the
    /// host's own loopback client.
    pub fn new(my_id: ClientId, embedded: bool) -> Self {
        Self {
            my_id,
            embedded,
            pending: PendingCommands::new(),
            buffered: None,
            last_server_tick: 0,
        }
    }

    /// This client's id.
    pub fn my_id(&self) -> ClientId {
        self.my_id
    }

    /// `true` for the host's embedded client.
    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    /// Number of commands awaiting authority confirmation.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Server tick of the newest applied snapshot.
    pub fn last_server_tick(&self) -> Tick {
        self.last_server_tick
    }

    /// Stamps `payloads` with fresh sequence numbers, applies each to the
    /// local scene immediately (optimistic prediction — for the embedded
    /// host client this *is* the authoritative application), buffers them
    /// as pending, and returns the batch to transmit.
    pub fn predict(
        &mut self,
        scene: &mut Scene,
        tick: Tick,
        payloads: Vec<CommandPayload>,
    ) -> CommandBatch {
        let mut commands = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let command = self.pending.stamp(tick, payload);
            scene.apply_command(self.my_id, &command.payload);
            commands.push(command);
        }
        CommandBatch {
            client_id: self.my_id,
            commands,
        }
    }

    /// Handles an inbound snapshot according to the epoch rules.
    ///
    /// Same-epoch snapshots reconcile: overwrite the replicated tree,
    /// trim acknowledged commands, and replay the remainder on top —
    /// corrections happen without giving up the zero-latency illusion.
    pub fn on_snapshot(
        &mut self,
        scene: &mut Scene,
        registry: &EntityRegistry,
        snapshot: Snapshot,
    ) -> Result<SnapshotOutcome, MergeError> {
        let current = scene.epoch();
        if snapshot.scene_epoch < current {
            return Ok(SnapshotOutcome::StaleEpoch);
        }
        if snapshot.scene_epoch > current {
            self.buffer(snapshot);
            return Ok(SnapshotOutcome::Buffered);
        }
        if self.last_server_tick != 0 && snapshot.tick <= self.last_server_tick {
            return Ok(SnapshotOutcome::StaleTick);
        }
        self.apply_now(scene, registry, snapshot)
    }

    fn apply_now(
        &mut self,
        scene: &mut Scene,
        registry: &EntityRegistry,
        snapshot: Snapshot,
    ) -> Result<SnapshotOutcome, MergeError> {
        self.last_server_tick = snapshot.tick;
        let processed = snapshot.processed_for(self.my_id).unwrap_or(0);

        if self.embedded {
            // The host applied our commands directly; merging or replaying
            // would double-apply. Only keep the pending list from growing
            // without bound.
            self.pending.trim(processed);
            return Ok(SnapshotOutcome::TrimmedOnly);
        }

        let report = apply_snapshot(scene, registry, &snapshot.objects)?;
        self.pending.trim(processed);
        for command in self.pending.iter() {
            scene.apply_command(self.my_id, &command.payload);
        }
        Ok(SnapshotOutcome::Applied(report))
    }

    /// Keeps the newest future snapshot: a later epoch wins, and within an
    /// epoch a later tick wins.
    fn buffer(&mut self, snapshot: Snapshot) {
        let newer = match &self.buffered {
            Some(held) => {
                (snapshot.scene_epoch, snapshot.tick) > (held.scene_epoch, held.tick)
            }
            None => true,
        };
        if newer {
            self.buffered = Some(snapshot);
        }
    }

    /// Handles an inbound scene-change notice.
    ///
    /// On a switch (or embedded clear) all predicted command state is
    /// forgotten and buffered snapshots older than the new epoch are
    /// dropped; a buffered snapshot *for* the new epoch stays available
    /// via [`take_buffered`](Self::take_buffered).
    pub fn on_scene_change(&mut self, scene: &Scene, change: &SceneChange) -> SceneChangeAction {
        let current = scene.epoch();

        if self.embedded {
            // The shared scene was already switched by the authority
            // before the notice went out.
            if change.scene_epoch < current {
                return SceneChangeAction::Ignore;
            }
            self.reset_for_epoch(change.scene_epoch.0);
            return SceneChangeAction::ClearedOnly;
        }

        if change.scene_epoch <= current {
            return SceneChangeAction::Ignore;
        }
        self.reset_for_epoch(change.scene_epoch.0);
        SceneChangeAction::Switch
    }

    fn reset_for_epoch(&mut self, epoch: u64) {
        self.pending.clear();
        self.last_server_tick = 0;
        if self
            .buffered
            .as_ref()
            .is_some_and(|s| s.scene_epoch.0 < epoch)
        {
            self.buffered = None;
        }
    }

    /// Takes the buffered snapshot if it belongs to the scene's current
    /// epoch; called right after a scene switch.
    pub fn take_buffered(&mut self, scene: &Scene) -> Option<Snapshot> {
        if self
            .buffered
            .as_ref()
            .is_some_and(|s| s.scene_epoch == scene.epoch())
        {
            self.buffered.take()
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Replicated;
    use crate::snapshot::capture_scene;
    use rift_protocol::{
        EntityKindId, NetCommand, PropertyKind, PropertySet, PropertyValue, SceneEpoch, Vec2,
        WireError, WireReader, WireWriter,
    };
    use std::any::Any;
    use std::sync::OnceLock;

    #[derive(Debug, Default)]
    struct Runner {
        position: Vec2,
        facing: u8,
    }

    impl Runner {
        const KIND: EntityKindId = EntityKindId(21);

        fn properties() -> &'static PropertySet<Runner> {
            static SET: OnceLock<PropertySet<Runner>> = OnceLock::new();
            SET.get_or_init(|| {
                PropertySet::new()
                    .register(
                        0,
                        "position",
                        PropertyKind::Vec2,
                        |r: &Runner| PropertyValue::Vec2(r.position),
                        |r, v| {
                            if let PropertyValue::Vec2(vec) = v {
                                r.position = vec;
                            }
                        },
                    )
                    .register(
                        1,
                        "facing",
                        PropertyKind::Byte,
                        |r| PropertyValue::Byte(r.facing),
                        |r, v| {
                            if let PropertyValue::Byte(b) = v {
                                r.facing = b;
                            }
                        },
                    )
            })
        }
    }

    impl Replicated for Runner {
        fn kind(&self) -> EntityKindId {
            Self::KIND
        }
        fn encode_properties(&self, w: &mut WireWriter) {
            Self::properties().encode(self, w);
        }
        fn decode_properties(&mut self, r: &mut WireReader<'_>) -> Result<(), WireError> {
            Self::properties().decode(self, r)
        }
        fn apply_command(&mut self, command: &CommandPayload) {
            match command {
                CommandPayload::Move { dx, dy } => {
                    self.position.x += dx;
                    self.position.y += dy;
                }
                CommandPayload::Face { direction } => self.facing = *direction,
                CommandPayload::Action { .. } => {}
            }
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry.register(Runner::KIND, || Box::new(Runner::default()));
        registry
    }

    /// Scene with one runner avatar owned by `client`.
    fn scene_with_runner(client: ClientId, epoch: u64) -> Scene {
        let mut scene = Scene::new("arena", SceneEpoch(epoch));
        let id = scene
            .spawn(Box::new(Runner::default()), None, client, true)
            .unwrap();
        scene.set_avatar(client, id).unwrap();
        scene
    }

    fn position_of(scene: &Scene, client: ClientId) -> Vec2 {
        let id = scene.avatar_of(client).unwrap();
        scene
            .node(id)
            .unwrap()
            .entity
            .as_any()
            .downcast_ref::<Runner>()
            .unwrap()
            .position
    }

    fn batch(client: ClientId, seqs: &[u32]) -> CommandBatch {
        CommandBatch {
            client_id: client,
            commands: seqs
                .iter()
                .map(|s| NetCommand {
                    sequence: *s,
                    tick: *s as u64,
                    payload: CommandPayload::Move { dx: 1.0, dy: 0.0 },
                })
                .collect(),
        }
    }

    fn snapshot_of(scene: &Scene, tick: Tick, processed: Vec<(ClientId, u32)>) -> Snapshot {
        Snapshot {
            tick,
            scene_epoch: scene.epoch(),
            last_processed: processed,
            objects: capture_scene(scene),
        }
    }

    // --- authority ---

    #[test]
    fn test_duplicate_batch_applies_once() {
        let client = ClientId(1);
        let mut scene = scene_with_runner(client, 1);
        let mut authority = AuthoritySync::new();

        let batch = batch(client, &[1, 2, 3]);
        assert_eq!(authority.ingest_batch(&mut scene, client, &batch, false), 3);
        // Retransmission of the very same batch.
        assert_eq!(authority.ingest_batch(&mut scene, client, &batch, false), 0);

        assert_eq!(position_of(&scene, client), Vec2::new(3.0, 0.0));
        assert_eq!(authority.processed(client), 3);
    }

    #[test]
    fn test_partial_overlap_applies_only_fresh() {
        let client = ClientId(1);
        let mut scene = scene_with_runner(client, 1);
        let mut authority = AuthoritySync::new();

        authority.ingest_batch(&mut scene, client, &batch(client, &[1, 2]), false);
        // Retransmit includes 1..2 plus new 3..4.
        let accepted =
            authority.ingest_batch(&mut scene, client, &batch(client, &[1, 2, 3, 4]), false);
        assert_eq!(accepted, 2);
        assert_eq!(position_of(&scene, client), Vec2::new(4.0, 0.0));
    }

    #[test]
    fn test_spoofed_client_id_is_overridden() {
        let real = ClientId(1);
        let mut scene = scene_with_runner(real, 1);
        let mut authority = AuthoritySync::new();

        let mut spoofed = batch(real, &[1]);
        spoofed.client_id = ClientId(99);
        authority.ingest_batch(&mut scene, real, &spoofed, false);

        assert_eq!(authority.processed(real), 1);
        assert_eq!(authority.processed(ClientId(99)), 0);
        assert_eq!(position_of(&scene, real), Vec2::new(1.0, 0.0));
    }

    #[test]
    fn test_embedded_batch_advances_mark_without_applying() {
        let client = ClientId(1);
        let mut scene = scene_with_runner(client, 1);
        let mut authority = AuthoritySync::new();

        let accepted = authority.ingest_batch(&mut scene, client, &batch(client, &[1, 2]), true);
        assert_eq!(accepted, 2);
        assert_eq!(authority.processed(client), 2);
        // The embedded client already moved the shared scene; the
        // authority must not double it.
        assert_eq!(position_of(&scene, client), Vec2::new(0.0, 0.0));
    }

    // --- client: prediction & reconciliation ---

    #[test]
    fn test_prediction_applies_immediately() {
        let client = ClientId(1);
        let mut scene = scene_with_runner(client, 1);
        let mut sync = ClientSync::new(client, false);

        let batch = sync.predict(
            &mut scene,
            5,
            vec![
                CommandPayload::Move { dx: 2.0, dy: 0.0 },
                CommandPayload::Move { dx: 0.0, dy: 3.0 },
            ],
        );

        assert_eq!(position_of(&scene, client), Vec2::new(2.0, 3.0));
        assert_eq!(batch.commands.len(), 2);
        assert_eq!(batch.commands[0].sequence, 1);
        assert_eq!(batch.commands[1].sequence, 2);
        assert_eq!(sync.pending_len(), 2);
    }

    #[test]
    fn test_reconciliation_convergence_when_all_processed() {
        let client = ClientId(1);
        let registry = registry();

        // Authority applies all five commands.
        let mut server_scene = scene_with_runner(client, 1);
        let mut authority = AuthoritySync::new();
        let mut client_scene = scene_with_runner(client, 1);
        let mut sync = ClientSync::new(client, false);

        for tick in 1..=5u64 {
            let batch = sync.predict(
                &mut client_scene,
                tick,
                vec![CommandPayload::Move { dx: 1.0, dy: 0.0 }],
            );
            authority.ingest_batch(&mut server_scene, client, &batch, false);
        }
        assert_eq!(sync.pending_len(), 5);

        let snap = snapshot_of(&server_scene, 100, authority.report());
        let outcome = sync.on_snapshot(&mut client_scene, &registry, snap).unwrap();

        assert!(matches!(outcome, SnapshotOutcome::Applied(_)));
        assert!(sync.pending_len() == 0, "all commands confirmed");
        assert_eq!(
            position_of(&client_scene, client),
            position_of(&server_scene, client),
            "client state equals the snapshot exactly, no leftover replay"
        );
    }

    #[test]
    fn test_reconciliation_replays_unconfirmed_commands() {
        let client = ClientId(1);
        let registry = registry();

        let mut server_scene = scene_with_runner(client, 1);
        let mut authority = AuthoritySync::new();
        let mut client_scene = scene_with_runner(client, 1);
        let mut sync = ClientSync::new(client, false);

        // Five predicted moves; the authority has only seen the first two.
        for tick in 1..=5u64 {
            let batch = sync.predict(
                &mut client_scene,
                tick,
                vec![CommandPayload::Move { dx: 1.0, dy: 0.0 }],
            );
            if tick <= 2 {
                authority.ingest_batch(&mut server_scene, client, &batch, false);
            }
        }
        assert_eq!(position_of(&client_scene, client), Vec2::new(5.0, 0.0));
        assert_eq!(position_of(&server_scene, client), Vec2::new(2.0, 0.0));

        let snap = snapshot_of(&server_scene, 50, authority.report());
        sync.on_snapshot(&mut client_scene, &registry, snap).unwrap();

        // Authoritative 2.0 plus replay of the three unconfirmed moves.
        assert_eq!(position_of(&client_scene, client), Vec2::new(5.0, 0.0));
        assert_eq!(sync.pending_len(), 3);
    }

    #[test]
    fn test_embedded_client_only_trims() {
        let client = ClientId(1);
        let registry = registry();
        let mut scene = scene_with_runner(client, 1);
        let mut sync = ClientSync::new(client, true);

        // Embedded prediction is the authoritative application.
        for tick in 1..=3u64 {
            sync.predict(
                &mut scene,
                tick,
                vec![CommandPayload::Move { dx: 1.0, dy: 0.0 }],
            );
        }
        let snap = snapshot_of(&scene, 10, vec![(client, 3)]);
        let outcome = sync.on_snapshot(&mut scene, &registry, snap).unwrap();

        assert_eq!(outcome, SnapshotOutcome::TrimmedOnly);
        assert_eq!(sync.pending_len(), 0);
        // No re-apply: position reflects exactly the three predictions.
        assert_eq!(position_of(&scene, client), Vec2::new(3.0, 0.0));
    }

    // --- client: epoch gating ---

    #[test]
    fn test_applied_epochs_are_non_decreasing() {
        let client = ClientId(1);
        let registry = registry();
        let mut scene = scene_with_runner(client, 2);
        let mut sync = ClientSync::new(client, false);

        let mut source = scene_with_runner(client, 2);
        let current = snapshot_of(&source, 10, vec![]);
        let mut stale = snapshot_of(&source, 11, vec![]);
        stale.scene_epoch = SceneEpoch(1);
        source = scene_with_runner(client, 3);
        let future = snapshot_of(&source, 12, vec![]);

        assert!(matches!(
            sync.on_snapshot(&mut scene, &registry, current).unwrap(),
            SnapshotOutcome::Applied(_)
        ));
        assert_eq!(
            sync.on_snapshot(&mut scene, &registry, stale).unwrap(),
            SnapshotOutcome::StaleEpoch
        );
        assert_eq!(
            sync.on_snapshot(&mut scene, &registry, future).unwrap(),
            SnapshotOutcome::Buffered
        );
    }

    #[test]
    fn test_stale_tick_within_epoch_dropped() {
        let client = ClientId(1);
        let registry = registry();
        let mut scene = scene_with_runner(client, 1);
        let mut sync = ClientSync::new(client, false);

        let source = scene_with_runner(client, 1);
        let newer = snapshot_of(&source, 20, vec![]);
        let older = snapshot_of(&source, 15, vec![]);

        assert!(matches!(
            sync.on_snapshot(&mut scene, &registry, newer).unwrap(),
            SnapshotOutcome::Applied(_)
        ));
        assert_eq!(
            sync.on_snapshot(&mut scene, &registry, older).unwrap(),
            SnapshotOutcome::StaleTick
        );
    }

    #[test]
    fn test_future_snapshot_buffered_until_scene_change() {
        let client = ClientId(1);
        let registry = registry();
        let mut scene = scene_with_runner(client, 2);
        let mut sync = ClientSync::new(client, false);

        // Epoch-3 state arrives while we are still in epoch 2.
        let mut future_source = scene_with_runner(client, 3);
        let id = future_source.avatar_of(client).unwrap();
        future_source
            .node_mut(id)
            .unwrap()
            .entity
            .as_any_mut()
            .downcast_mut::<Runner>()
            .unwrap()
            .position = Vec2::new(7.0, 7.0);
        let future = snapshot_of(&future_source, 1, vec![]);

        assert_eq!(
            sync.on_snapshot(&mut scene, &registry, future).unwrap(),
            SnapshotOutcome::Buffered
        );
        assert!(sync.take_buffered(&scene).is_none(), "not until the switch");

        // The scene change arrives; the session rebuilds and applies the
        // buffered snapshot.
        let change = SceneChange {
            scene_epoch: SceneEpoch(3),
            scene_key: "caverns".to_string(),
        };
        assert_eq!(sync.on_scene_change(&scene, &change), SceneChangeAction::Switch);

        let mut scene = Scene::new("caverns", SceneEpoch(3));
        let buffered = sync.take_buffered(&scene).expect("kept for the new epoch");
        sync.on_snapshot(&mut scene, &registry, buffered).unwrap();
        assert_eq!(position_of(&scene, client), Vec2::new(7.0, 7.0));
    }

    #[test]
    fn test_scene_change_clears_pending_and_stale_buffer() {
        let client = ClientId(1);
        let registry = registry();
        let mut scene = scene_with_runner(client, 1);
        let mut sync = ClientSync::new(client, false);

        sync.predict(
            &mut scene,
            1,
            vec![CommandPayload::Move { dx: 1.0, dy: 0.0 }],
        );
        // Buffer an epoch-2 snapshot, then jump straight to epoch 3.
        let source = scene_with_runner(client, 2);
        sync.on_snapshot(&mut scene, &registry, snapshot_of(&source, 1, vec![]))
            .unwrap();

        let change = SceneChange {
            scene_epoch: SceneEpoch(3),
            scene_key: "depths".to_string(),
        };
        assert_eq!(sync.on_scene_change(&scene, &change), SceneChangeAction::Switch);
        assert_eq!(sync.pending_len(), 0);

        let scene = Scene::new("depths", SceneEpoch(3));
        assert!(
            sync.take_buffered(&scene).is_none(),
            "epoch-2 buffer must be dropped by the jump to 3"
        );
    }

    #[test]
    fn test_stale_scene_change_ignored() {
        let client = ClientId(1);
        let mut sync = ClientSync::new(client, false);
        let mut scene = scene_with_runner(client, 5);
        sync.predict(
            &mut scene,
            1,
            vec![CommandPayload::Move { dx: 1.0, dy: 0.0 }],
        );

        let change = SceneChange {
            scene_epoch: SceneEpoch(4),
            scene_key: "old".to_string(),
        };
        assert_eq!(sync.on_scene_change(&scene, &change), SceneChangeAction::Ignore);
        assert_eq!(sync.pending_len(), 1, "stale notice must not clear state");
    }

    #[test]
    fn test_embedded_scene_change_clears_without_switch() {
        let client = ClientId(1);
        let mut sync = ClientSync::new(client, true);
        // The authority already switched the shared scene to epoch 2.
        let mut scene = scene_with_runner(client, 2);
        sync.predict(
            &mut scene,
            1,
            vec![CommandPayload::Move { dx: 1.0, dy: 0.0 }],
        );

        let change = SceneChange {
            scene_epoch: SceneEpoch(2),
            scene_key: "arena".to_string(),
        };
        assert_eq!(
            sync.on_scene_change(&scene, &change),
            SceneChangeAction::ClearedOnly
        );
        assert_eq!(sync.pending_len(), 0);
    }

    #[test]
    fn test_buffer_keeps_newest_future_snapshot() {
        let client = ClientId(1);
        let registry = registry();
        let mut scene = scene_with_runner(client, 1);
        let mut sync = ClientSync::new(client, false);

        let mut source = scene_with_runner(client, 2);
        let early = snapshot_of(&source, 5, vec![]);
        let id = source.avatar_of(client).unwrap();
        source
            .node_mut(id)
            .unwrap()
            .entity
            .as_any_mut()
            .downcast_mut::<Runner>()
            .unwrap()
            .position = Vec2::new(4.0, 0.0);
        let late = snapshot_of(&source, 9, vec![]);

        sync.on_snapshot(&mut scene, &registry, late).unwrap();
        sync.on_snapshot(&mut scene, &registry, early).unwrap();

        let scene2 = Scene::new("arena", SceneEpoch(2));
        let kept = sync.take_buffered(&scene2).unwrap();
        assert_eq!(kept.tick, 9, "the newer future snapshot wins");
    }
}
