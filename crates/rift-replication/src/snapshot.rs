//! Snapshot capture on the authority and the full-replace merge on the
//! client.
//!
//! Capture walks the scene's top-level replicated entities and serializes
//! each one with its replicated descendants. The merge makes the local
//! tree match the incoming snapshot exactly: find-or-construct by network
//! id, reparent where the live parent disagrees, overwrite registered
//! properties from the blob, and despawn everything the snapshot no longer
//! mentions. Correct but not bandwidth-optimal — there is deliberately no
//! per-field delta tracking.

use std::collections::HashSet;

use rift_protocol::{NetworkId, ReplicatedObjectData, WireError, WireReader, WireWriter};

use crate::entity::EntityRegistry;
use crate::scene::{Scene, SceneError};

/// What one merge did to the local tree.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Entities constructed because the snapshot mentioned unknown ids.
    pub spawned: Vec<NetworkId>,
    /// Entities removed because the snapshot no longer mentioned them
    /// (includes their despawned descendants).
    pub despawned: Vec<NetworkId>,
}

/// Errors during a snapshot merge.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// A property blob did not decode against the registered set.
    #[error("property blob for {id:?}: {source}")]
    Properties {
        /// The entity whose blob failed.
        id: NetworkId,
        /// The decode failure.
        source: WireError,
    },

    /// A tree operation failed; indicates a malformed snapshot.
    #[error("tree operation failed: {0}")]
    Tree(#[from] SceneError),
}

/// Serializes every top-level replicated entity of `scene`, recursively.
pub fn capture_scene(scene: &Scene) -> Vec<ReplicatedObjectData> {
    scene
        .roots()
        .iter()
        .filter(|id| scene.node(**id).is_some_and(|n| n.replicates))
        .map(|id| capture_node(scene, *id))
        .collect()
}

fn capture_node(scene: &Scene, id: NetworkId) -> ReplicatedObjectData {
    let node = scene.node(id).expect("caller verified presence");
    let mut writer = WireWriter::new();
    node.entity.encode_properties(&mut writer);

    ReplicatedObjectData {
        kind: node.entity.kind(),
        network_id: id,
        owner: node.owner,
        properties: writer.into_bytes(),
        children: node
            .children
            .iter()
            .filter(|child| scene.node(**child).is_some_and(|n| n.replicates))
            .map(|child| capture_node(scene, *child))
            .collect(),
    }
}

/// Makes `scene`'s replicated subtree match `objects` exactly.
///
/// Snapshot nodes whose kind has no constructor in `registry` are skipped
/// with a warning (their subtrees too) — the strict-version-lockstep
/// assumption means this only happens across incompatible builds.
pub fn apply_snapshot(
    scene: &mut Scene,
    registry: &EntityRegistry,
    objects: &[ReplicatedObjectData],
) -> Result<MergeReport, MergeError> {
    let mut report = MergeReport::default();
    let mut seen = HashSet::new();

    for object in objects {
        merge_node(scene, registry, object, None, &mut seen, &mut report)?;
    }

    // Despawn pass: anything replicated that the snapshot did not mention.
    for id in scene.replicated_ids() {
        if !seen.contains(&id) && scene.contains(id) {
            report.despawned.extend(scene.despawn(id)?);
        }
    }

    Ok(report)
}

fn merge_node(
    scene: &mut Scene,
    registry: &EntityRegistry,
    object: &ReplicatedObjectData,
    parent: Option<NetworkId>,
    seen: &mut HashSet<NetworkId>,
    report: &mut MergeReport,
) -> Result<(), MergeError> {
    let id = object.network_id;

    // Only replicated nodes of the same kind can be adopted. A kind change
    // means the live entity is stale beyond repair, and a local-only node
    // squatting on the id lost an allocation race with the authority —
    // either way the authority wins and the node is replaced wholesale.
    if let Some(node) = scene.node(id)
        && (node.entity.kind() != object.kind || !node.replicates)
    {
        tracing::warn!(
            "{id:?} (kind {:?}, replicates={}) conflicts with snapshot kind {:?}, reconstructing",
            node.entity.kind(),
            node.replicates,
            object.kind
        );
        report.despawned.extend(scene.despawn(id)?);
    }

    if scene.contains(id) {
        if scene.node(id).expect("checked").parent != parent {
            scene.reparent(id, parent)?;
        }
        scene.set_owner(id, object.owner)?;
    } else {
        let Some(entity) = registry.construct(object.kind) else {
            tracing::warn!("no constructor for kind {:?}, skipping {id:?}", object.kind);
            return Ok(());
        };
        scene.spawn_with_id(id, entity, parent, object.owner, true)?;
        report.spawned.push(id);
    }

    let node = scene.node_mut(id).expect("present by construction");
    node.entity
        .decode_properties(&mut WireReader::new(&object.properties))
        .map_err(|source| MergeError::Properties { id, source })?;
    seen.insert(id);

    for child in &object.children {
        merge_node(scene, registry, child, Some(id), seen, report)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
