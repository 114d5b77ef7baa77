//! The scene: an acyclic tree of entities keyed by network id.
//!
//! Entities live in an arena keyed by [`NetworkId`], with explicit parent
//! and child links. A child has exactly one parent, the arena owns every
//! entity exclusively, and reparenting an entity under its own descendant
//! is rejected — the tree cannot become cyclic. Spawn and despawn are
//! recorded as [`SceneEvent`]s so trigger/collision consumers can release
//! references exactly once.

use std::collections::HashMap;

use rift_protocol::{ClientId, CommandPayload, NetworkId, SceneEpoch, SceneKey};

use crate::entity::Replicated;

/// Structural change notifications, drained once per tick by interested
/// subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEvent {
    /// An entity entered the tree.
    Spawned(NetworkId),
    /// An entity left the tree. Fired exactly once per entity.
    Despawned(NetworkId),
}

/// Errors from tree operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SceneError {
    /// The referenced entity is not in this scene.
    #[error("unknown entity {0:?}")]
    UnknownEntity(NetworkId),

    /// An entity with this id is already present.
    #[error("{0:?} is already in the scene")]
    DuplicateNetworkId(NetworkId),

    /// The requested parent is the entity itself or one of its
    /// descendants.
    #[error("parenting {child:?} under {parent:?} would create a cycle")]
    WouldCycle {
        /// The entity being reparented.
        child: NetworkId,
        /// The rejected parent.
        parent: NetworkId,
    },
}

/// One arena slot: the entity plus its tree links and replication state.
pub struct SceneNode {
    /// The entity itself.
    pub entity: Box<dyn Replicated>,
    /// Parent link; `None` for top-level entities.
    pub parent: Option<NetworkId>,
    /// Children in spawn order.
    pub children: Vec<NetworkId>,
    /// Owning client (`ClientId::SERVER` for environment-owned).
    pub owner: ClientId,
    /// Whether this entity appears in snapshots.
    pub replicates: bool,
}

/// The entity tree for one scene epoch.
pub struct Scene {
    key: SceneKey,
    epoch: SceneEpoch,
    nodes: HashMap<NetworkId, SceneNode>,
    roots: Vec<NetworkId>,
    avatars: HashMap<ClientId, NetworkId>,
    next_network_id: u64,
    events: Vec<SceneEvent>,
}

impl Scene {
    /// Creates an empty scene for `key` at `epoch`.
    pub fn new(key: impl Into<SceneKey>, epoch: SceneEpoch) -> Self {
        Self {
            key: key.into(),
            epoch,
            nodes: HashMap::new(),
            roots: Vec::new(),
            avatars: HashMap::new(),
            next_network_id: 1,
            events: Vec::new(),
        }
    }

    /// The scene key.
    pub fn key(&self) -> &SceneKey {
        &self.key
    }

    /// The epoch this scene was created under.
    pub fn epoch(&self) -> SceneEpoch {
        self.epoch
    }

    /// Number of entities in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` if the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level entities in spawn order.
    pub fn roots(&self) -> &[NetworkId] {
        &self.roots
    }

    /// `true` if `id` is in the tree.
    pub fn contains(&self, id: NetworkId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// The node for `id`.
    pub fn node(&self, id: NetworkId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    /// The mutable node for `id`.
    pub fn node_mut(&mut self, id: NetworkId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(&id)
    }

    /// Every id whose node replicates, in no particular order.
    pub fn replicated_ids(&self) -> Vec<NetworkId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.replicates)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Spawns `entity` with an authority-allocated id.
    pub fn spawn(
        &mut self,
        entity: Box<dyn Replicated>,
        parent: Option<NetworkId>,
        owner: ClientId,
        replicates: bool,
    ) -> Result<NetworkId, SceneError> {
        let id = NetworkId(self.next_network_id);
        self.next_network_id += 1;
        self.attach(id, entity, parent, owner, replicates)?;
        Ok(id)
    }

    /// Spawns `entity` under a caller-supplied id, used when mirroring the
    /// authority's allocations during a snapshot merge.
    pub fn spawn_with_id(
        &mut self,
        id: NetworkId,
        entity: Box<dyn Replicated>,
        parent: Option<NetworkId>,
        owner: ClientId,
        replicates: bool,
    ) -> Result<(), SceneError> {
        if self.contains(id) {
            return Err(SceneError::DuplicateNetworkId(id));
        }
        // Keep the local allocator clear of mirrored ids.
        self.next_network_id = self.next_network_id.max(id.0 + 1);
        self.attach(id, entity, parent, owner, replicates)
    }

    fn attach(
        &mut self,
        id: NetworkId,
        entity: Box<dyn Replicated>,
        parent: Option<NetworkId>,
        owner: ClientId,
        replicates: bool,
    ) -> Result<(), SceneError> {
        if let Some(parent_id) = parent {
            if !self.contains(parent_id) {
                return Err(SceneError::UnknownEntity(parent_id));
            }
        }
        self.nodes.insert(
            id,
            SceneNode {
                entity,
                parent,
                children: Vec::new(),
                owner,
                replicates,
            },
        );
        match parent {
            Some(parent_id) => self
                .nodes
                .get_mut(&parent_id)
                .expect("parent checked above")
                .children
                .push(id),
            None => self.roots.push(id),
        }
        self.events.push(SceneEvent::Spawned(id));
        Ok(())
    }

    /// Removes `id` and its whole subtree. Returns the removed ids,
    /// subtree-root first; each fires [`SceneEvent::Despawned`] once.
    pub fn despawn(&mut self, id: NetworkId) -> Result<Vec<NetworkId>, SceneError> {
        if !self.contains(id) {
            return Err(SceneError::UnknownEntity(id));
        }
        self.detach_from_parent(id);

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
                removed.push(current);
                self.events.push(SceneEvent::Despawned(current));
            }
        }
        self.avatars.retain(|_, avatar| !removed.contains(avatar));
        Ok(removed)
    }

    fn detach_from_parent(&mut self, id: NetworkId) {
        let parent = self.nodes.get(&id).and_then(|n| n.parent);
        match parent {
            Some(parent_id) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                    parent_node.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
    }

    /// Moves `id` under `new_parent` (or to the top level for `None`).
    ///
    /// Rejected with [`SceneError::WouldCycle`] when `new_parent` is `id`
    /// itself or any of its descendants.
    pub fn reparent(
        &mut self,
        id: NetworkId,
        new_parent: Option<NetworkId>,
    ) -> Result<(), SceneError> {
        if !self.contains(id) {
            return Err(SceneError::UnknownEntity(id));
        }
        if let Some(parent_id) = new_parent {
            if !self.contains(parent_id) {
                return Err(SceneError::UnknownEntity(parent_id));
            }
            // Walk up from the candidate parent; hitting `id` means the
            // candidate lives inside `id`'s subtree.
            let mut cursor = Some(parent_id);
            while let Some(current) = cursor {
                if current == id {
                    return Err(SceneError::WouldCycle {
                        child: id,
                        parent: parent_id,
                    });
                }
                cursor = self.nodes.get(&current).and_then(|n| n.parent);
            }
        }

        self.detach_from_parent(id);
        self.nodes.get_mut(&id).expect("presence checked").parent = new_parent;
        match new_parent {
            Some(parent_id) => self
                .nodes
                .get_mut(&parent_id)
                .expect("presence checked")
                .children
                .push(id),
            None => self.roots.push(id),
        }
        Ok(())
    }

    /// Overwrites the owner recorded for `id`.
    pub fn set_owner(&mut self, id: NetworkId, owner: ClientId) -> Result<(), SceneError> {
        self.nodes
            .get_mut(&id)
            .map(|node| node.owner = owner)
            .ok_or(SceneError::UnknownEntity(id))
    }

    /// Marks `id` as `client`'s avatar — the entity its net commands are
    /// routed to.
    pub fn set_avatar(&mut self, client: ClientId, id: NetworkId) -> Result<(), SceneError> {
        if !self.contains(id) {
            return Err(SceneError::UnknownEntity(id));
        }
        self.avatars.insert(client, id);
        Ok(())
    }

    /// The avatar for `client`: the explicitly marked entity, or — on
    /// scenes rebuilt from snapshots, where no marks exist — the first
    /// replicated entity owned by `client` in tree order.
    pub fn avatar_of(&self, client: ClientId) -> Option<NetworkId> {
        if let Some(id) = self.avatars.get(&client) {
            return Some(*id);
        }
        self.iter_depth_first()
            .find(|id| {
                self.nodes
                    .get(id)
                    .is_some_and(|n| n.replicates && n.owner == client)
            })
    }

    /// Routes a command payload to `client`'s avatar. A missing avatar is
    /// not an error: commands can race a despawn.
    pub fn apply_command(&mut self, client: ClientId, command: &CommandPayload) {
        if let Some(id) = self.avatar_of(client)
            && let Some(node) = self.nodes.get_mut(&id)
        {
            node.entity.apply_command(command);
        }
    }

    /// Depth-first iteration over the whole tree, roots in spawn order.
    pub fn iter_depth_first(&self) -> impl Iterator<Item = NetworkId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NetworkId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().rev());
            }
        }
        order.into_iter()
    }

    /// Drains the structural events recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rift_protocol::{EntityKindId, WireError, WireReader, WireWriter};
    use std::any::Any;

    struct Stub;

    impl Replicated for Stub {
        fn kind(&self) -> EntityKindId {
            EntityKindId(1)
        }
        fn encode_properties(&self, _w: &mut WireWriter) {}
        fn decode_properties(&mut self, _r: &mut WireReader<'_>) -> Result<(), WireError> {
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn scene() -> Scene {
        Scene::new("test", SceneEpoch(1))
    }

    #[test]
    fn test_spawn_allocates_monotonic_ids() {
        let mut scene = scene();
        let a = scene
            .spawn(Box::new(Stub), None, ClientId::SERVER, true)
            .unwrap();
        let b = scene
            .spawn(Box::new(Stub), None, ClientId::SERVER, true)
            .unwrap();
        assert_eq!(a, NetworkId(1));
        assert_eq!(b, NetworkId(2));
        assert_eq!(scene.roots(), &[a, b]);
    }

    #[test]
    fn test_child_has_exactly_one_parent() {
        let mut scene = scene();
        let parent = scene
            .spawn(Box::new(Stub), None, ClientId::SERVER, true)
            .unwrap();
        let child = scene
            .spawn(Box::new(Stub), Some(parent), ClientId::SERVER, true)
            .unwrap();

        assert_eq!(scene.node(child).unwrap().parent, Some(parent));
        assert_eq!(scene.node(parent).unwrap().children, vec![child]);
        assert!(!scene.roots().contains(&child));
    }

    #[test]
    fn test_reparent_moves_subtree() {
        let mut scene = scene();
        let a = scene
            .spawn(Box::new(Stub), None, ClientId::SERVER, true)
            .unwrap();
        let b = scene
            .spawn(Box::new(Stub), None, ClientId::SERVER, true)
            .unwrap();
        let child = scene
            .spawn(Box::new(Stub), Some(a), ClientId::SERVER, true)
            .unwrap();

        scene.reparent(child, Some(b)).unwrap();
        assert!(scene.node(a).unwrap().children.is_empty());
        assert_eq!(scene.node(b).unwrap().children, vec![child]);
        assert_eq!(scene.node(child).unwrap().parent, Some(b));
    }

    #[test]
    fn test_ancestor_as_child_rejected() {
        let mut scene = scene();
        let grandparent = scene
            .spawn(Box::new(Stub), None, ClientId::SERVER, true)
            .unwrap();
        let parent = scene
            .spawn(Box::new(Stub), Some(grandparent), ClientId::SERVER, true)
            .unwrap();
        let child = scene
            .spawn(Box::new(Stub), Some(parent), ClientId::SERVER, true)
            .unwrap();

        let result = scene.reparent(grandparent, Some(child));
        assert_eq!(
            result,
            Err(SceneError::WouldCycle {
                child: grandparent,
                parent: child,
            })
        );
        // Self-parenting is the degenerate cycle.
        assert!(matches!(
            scene.reparent(child, Some(child)),
            Err(SceneError::WouldCycle { .. })
        ));
    }

    #[test]
    fn test_despawn_removes_subtree_with_one_event_each() {
        let mut scene = scene();
        let parent = scene
            .spawn(Box::new(Stub), None, ClientId::SERVER, true)
            .unwrap();
        let child = scene
            .spawn(Box::new(Stub), Some(parent), ClientId::SERVER, true)
            .unwrap();
        let grandchild = scene
            .spawn(Box::new(Stub), Some(child), ClientId::SERVER, true)
            .unwrap();
        scene.drain_events();

        let removed = scene.despawn(parent).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(scene.is_empty());
        assert!(scene.roots().is_empty());

        let events = scene.drain_events();
        for id in [parent, child, grandchild] {
            let count = events
                .iter()
                .filter(|e| **e == SceneEvent::Despawned(id))
                .count();
            assert_eq!(count, 1, "{id:?} must despawn exactly once");
        }
        // Despawning again is an error, not a second event.
        assert_eq!(scene.despawn(parent), Err(SceneError::UnknownEntity(parent)));
    }

    #[test]
    fn test_despawn_clears_avatar_mapping() {
        let mut scene = scene();
        let id = scene
            .spawn(Box::new(Stub), None, ClientId(3), true)
            .unwrap();
        scene.set_avatar(ClientId(3), id).unwrap();
        scene.despawn(id).unwrap();
        assert_eq!(scene.avatar_of(ClientId(3)), None);
    }

    #[test]
    fn test_avatar_falls_back_to_owned_entity() {
        let mut scene = scene();
        let _env = scene
            .spawn(Box::new(Stub), None, ClientId::SERVER, true)
            .unwrap();
        let owned = scene
            .spawn(Box::new(Stub), None, ClientId(2), true)
            .unwrap();
        // No explicit mark: ownership decides.
        assert_eq!(scene.avatar_of(ClientId(2)), Some(owned));
    }

    #[test]
    fn test_spawn_with_id_rejects_duplicates_and_advances_allocator() {
        let mut scene = scene();
        scene
            .spawn_with_id(NetworkId(10), Box::new(Stub), None, ClientId::SERVER, true)
            .unwrap();
        assert_eq!(
            scene.spawn_with_id(NetworkId(10), Box::new(Stub), None, ClientId::SERVER, true),
            Err(SceneError::DuplicateNetworkId(NetworkId(10)))
        );
        // The allocator must not hand out mirrored ids.
        let fresh = scene
            .spawn(Box::new(Stub), None, ClientId::SERVER, true)
            .unwrap();
        assert_eq!(fresh, NetworkId(11));
    }

    #[test]
    fn test_depth_first_order() {
        let mut scene = scene();
        let a = scene
            .spawn(Box::new(Stub), None, ClientId::SERVER, true)
            .unwrap();
        let a1 = scene
            .spawn(Box::new(Stub), Some(a), ClientId::SERVER, true)
            .unwrap();
        let a2 = scene
            .spawn(Box::new(Stub), Some(a), ClientId::SERVER, true)
            .unwrap();
        let b = scene
            .spawn(Box::new(Stub), None, ClientId::SERVER, true)
            .unwrap();

        let order: Vec<_> = scene.iter_depth_first().collect();
        assert_eq!(order, vec![a, a1, a2, b]);
    }
}
