//! Normalized view of the host objects that can become bones, cubes or locators.

pub mod cuboid;
pub mod memory;

use std::collections::{HashMap, HashSet};
use std::fmt;

use log::debug;
use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::ConversionError;
use crate::math::{
    MINECRAFT_SCALE_FACTOR, local_matrix, mc_rotation, normalized, scale_of, swap_yz,
    translation_of,
};

// ─── Custom attribute keys ──────────────────────────────────────────────────

pub const ATTR_PARENT: &str = "mc_parent";
pub const ATTR_IS_BONE: &str = "mc_is_bone";
pub const ATTR_UV_GROUP: &str = "mc_uv_group";
pub const ATTR_MIRROR: &str = "mc_mirror";
pub const ATTR_INFLATE: &str = "mc_inflate";
pub const ATTR_UV: &str = "mc_uv";
pub const ATTR_MIN_UV_SIZE: &str = "mc_min_uv_size";

// ─── Identity ───────────────────────────────────────────────────────────────

/// Unique convertible entity: a standalone object or a bone of an armature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    pub name: String,
    pub bone_name: Option<String>,
}

impl ObjectId {
    pub fn object(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bone_name: None,
        }
    }

    pub fn bone(armature: impl Into<String>, bone: impl Into<String>) -> Self {
        Self {
            name: armature.into(),
            bone_name: Some(bone.into()),
        }
    }

    /// Name used for this entity in engine files.
    pub fn export_name(&self) -> &str {
        self.bone_name.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bone_name {
            Some(bone) => write!(f, "{}:{}", self.name, bone),
            None => f.write_str(&self.name),
        }
    }
}

// ─── Host collaborator contract ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostObjectKind {
    Mesh,
    Empty,
    Armature,
    Other,
}

/// Value of a custom attribute stored on a host object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Pair([f64; 2]),
    Triple([f64; 3]),
    Object(ObjectId),
}

/// Bone entry of a host armature.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmatureBone {
    pub name: String,
    pub parent: Option<String>,
}

/// Polygon mesh in object-local coordinates.
///
/// `uvs`, when present, has one `[u, v]` entry per polygon corner in host UV
/// space (origin bottom-left, `0..1`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    pub vertices: Vec<Vector3<f64>>,
    pub polygons: Vec<Vec<usize>>,
    pub uvs: Option<Vec<Vec<[f64; 2]>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interpolation {
    #[default]
    Linear,
    Step,
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe {
    pub frame: f64,
    pub interpolation: Interpolation,
}

/// Read access to the host's scene, keyed by [`ObjectId`].
///
/// Armature bones are addressed with [`ObjectId::bone`].
pub trait HostScene {
    /// Selected objects in creation order.
    fn selected_objects(&self) -> Vec<ObjectId>;
    fn object_kind(&self, id: &ObjectId) -> HostObjectKind;
    fn world_transform(&self, id: &ObjectId) -> Matrix4<f64>;
    /// Local-space bounding box `(min, max)`; `None` for objects without geometry.
    fn bounding_box(&self, id: &ObjectId) -> Option<(Vector3<f64>, Vector3<f64>)>;
    fn mesh(&self, id: &ObjectId) -> Option<MeshData>;
    fn read_custom_attribute(&self, id: &ObjectId, key: &str) -> Option<AttributeValue>;
    fn armature_bones(&self, id: &ObjectId) -> Vec<ArmatureBone>;
    /// Keyframes of every animation curve driving the object, any order.
    fn keyframes(&self, id: &ObjectId) -> Vec<Keyframe>;
    fn set_frame(&mut self, frame: f64);
}

// ─── Metadata side-table ────────────────────────────────────────────────────

/// Custom attributes of one object, read once when the graph is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub parent: Option<ObjectId>,
    pub is_bone: bool,
    pub uv_group: Option<String>,
    pub mirror: bool,
    pub inflate: f64,
    pub uv: Option<[f64; 2]>,
    pub min_uv_size: [f64; 3],
}

impl Default for ObjectMetadata {
    fn default() -> Self {
        Self {
            parent: None,
            is_bone: false,
            uv_group: None,
            mirror: false,
            inflate: 0.0,
            uv: None,
            min_uv_size: [0.0, 0.0, 0.0],
        }
    }
}

impl ObjectMetadata {
    pub fn read(host: &impl HostScene, id: &ObjectId) -> Self {
        let mut metadata = Self::default();
        if let Some(AttributeValue::Object(parent)) = host.read_custom_attribute(id, ATTR_PARENT) {
            metadata.parent = Some(parent);
        }
        metadata.is_bone = matches!(
            host.read_custom_attribute(id, ATTR_IS_BONE),
            Some(AttributeValue::Bool(true))
        );
        if let Some(AttributeValue::Text(group)) = host.read_custom_attribute(id, ATTR_UV_GROUP) {
            if !group.is_empty() {
                metadata.uv_group = Some(group);
            }
        }
        metadata.mirror = matches!(
            host.read_custom_attribute(id, ATTR_MIRROR),
            Some(AttributeValue::Bool(true))
        );
        if let Some(AttributeValue::Number(inflate)) = host.read_custom_attribute(id, ATTR_INFLATE) {
            metadata.inflate = inflate;
        }
        if let Some(AttributeValue::Pair(uv)) = host.read_custom_attribute(id, ATTR_UV) {
            metadata.uv = Some(uv);
        }
        if let Some(AttributeValue::Triple(size)) = host.read_custom_attribute(id, ATTR_MIN_UV_SIZE) {
            metadata.min_uv_size = size;
        }
        metadata
    }
}

// ─── Nodes ──────────────────────────────────────────────────────────────────

/// Role of a node in the engine's model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Cube,
    Bone,
    Locator,
    /// A bone holding exactly one cube of its own.
    Both,
}

impl NodeKind {
    pub fn is_bone(self) -> bool {
        matches!(self, NodeKind::Bone | NodeKind::Both)
    }

    pub fn has_cube(self) -> bool {
        matches!(self, NodeKind::Cube | NodeKind::Both)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub id: ObjectId,
    pub kind: NodeKind,
    pub host_kind: HostObjectKind,
    pub parent: Option<ObjectId>,
    /// Children in creation order.
    pub children: Vec<ObjectId>,
    pub metadata: ObjectMetadata,
}

impl SceneNode {
    pub fn name(&self) -> &str {
        self.id.export_name()
    }
}

/// Classifies an object from its structural flags.
///
/// Returns `None` for armature bones that are neither parented nor parents;
/// those are helper bones and are not exported.
pub fn classify(
    host_kind: HostObjectKind,
    has_parent: bool,
    has_children: bool,
    is_bone_marker: bool,
) -> Option<NodeKind> {
    match host_kind {
        HostObjectKind::Empty => Some(if is_bone_marker || !has_parent || has_children {
            NodeKind::Bone
        } else {
            NodeKind::Locator
        }),
        HostObjectKind::Mesh => Some(if has_children || is_bone_marker {
            NodeKind::Both
        } else if has_parent {
            NodeKind::Cube
        } else {
            NodeKind::Both
        }),
        HostObjectKind::Armature => {
            if !has_parent && !has_children {
                None
            } else {
                Some(NodeKind::Bone)
            }
        }
        HostObjectKind::Other => None,
    }
}

// ─── Graph ──────────────────────────────────────────────────────────────────

/// `{ObjectId → SceneNode}` map of one conversion run, in creation order.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    nodes: Vec<SceneNode>,
    index: HashMap<ObjectId, usize>,
}

struct Candidate {
    id: ObjectId,
    host_kind: HostObjectKind,
    host_parent: Option<ObjectId>,
    metadata: ObjectMetadata,
}

/// Builds the scene graph from the host's selection.
///
/// Custom parent links stored in the metadata override host parenting. Links
/// to objects outside the selection are ignored.
///
/// # Errors
/// [`ConversionError::NameConflict`] when two exported entities share a name,
/// [`ConversionError::ParentCycle`] when parent links loop.
pub fn build_scene_graph(host: &impl HostScene) -> Result<SceneGraph, ConversionError> {
    let mut candidates = Vec::new();
    for object in host.selected_objects() {
        match host.object_kind(&object) {
            HostObjectKind::Armature => {
                for bone in host.armature_bones(&object) {
                    let id = ObjectId::bone(object.name.clone(), bone.name.clone());
                    let metadata = ObjectMetadata::read(host, &id);
                    candidates.push(Candidate {
                        host_parent: bone
                            .parent
                            .map(|parent| ObjectId::bone(object.name.clone(), parent)),
                        id,
                        host_kind: HostObjectKind::Armature,
                        metadata,
                    });
                }
            }
            kind @ (HostObjectKind::Mesh | HostObjectKind::Empty) => {
                let metadata = ObjectMetadata::read(host, &object);
                candidates.push(Candidate {
                    id: object,
                    host_kind: kind,
                    host_parent: None,
                    metadata,
                });
            }
            HostObjectKind::Other => debug!("skipping unsupported object {object}"),
        }
    }

    let known: HashSet<ObjectId> = candidates.iter().map(|c| c.id.clone()).collect();
    let parents: Vec<Option<ObjectId>> = candidates
        .iter()
        .map(|c| {
            c.metadata
                .parent
                .clone()
                .or_else(|| c.host_parent.clone())
                .filter(|parent| known.contains(parent) && parent != &c.id)
        })
        .collect();

    let mut children: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
    for (candidate, parent) in candidates.iter().zip(&parents) {
        if let Some(parent) = parent {
            children
                .entry(parent.clone())
                .or_default()
                .push(candidate.id.clone());
        }
    }

    let mut graph = SceneGraph::default();
    for (candidate, parent) in candidates.into_iter().zip(parents) {
        let node_children = children.remove(&candidate.id).unwrap_or_default();
        let Some(kind) = classify(
            candidate.host_kind,
            parent.is_some(),
            !node_children.is_empty(),
            candidate.metadata.is_bone,
        ) else {
            debug!("dropping unparented leaf bone {}", candidate.id);
            continue;
        };
        debug!("classified {} as {kind:?}", candidate.id);
        graph.push(SceneNode {
            id: candidate.id,
            kind,
            host_kind: candidate.host_kind,
            parent,
            children: node_children,
            metadata: candidate.metadata,
        });
    }

    graph.check_cycles()?;
    let conflict = get_name_conflicts(&graph);
    if !conflict.is_empty() {
        return Err(ConversionError::NameConflict { name: conflict });
    }
    Ok(graph)
}

/// Returns the first name shared by two exported entities, or an empty string.
///
/// Cubes are skipped because their names never reach the engine file.
pub fn get_name_conflicts(graph: &SceneGraph) -> String {
    let mut seen = HashSet::new();
    for node in graph.iter() {
        if node.kind == NodeKind::Cube {
            continue;
        }
        if !seen.insert(node.name()) {
            return node.name().to_string();
        }
    }
    String::new()
}

impl SceneGraph {
    pub fn push(&mut self, node: SceneNode) {
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
    }

    pub fn get(&self, id: &ObjectId) -> Option<&SceneNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn check_cycles(&self) -> Result<(), ConversionError> {
        for node in &self.nodes {
            let mut current = node.parent.as_ref();
            let mut steps = 0;
            while let Some(parent) = current {
                steps += 1;
                if steps > self.nodes.len() {
                    return Err(ConversionError::ParentCycle {
                        bone: node.name().to_string(),
                    });
                }
                current = self.get(parent).and_then(|p| p.parent.as_ref());
            }
        }
        Ok(())
    }

    fn node(&self, id: &ObjectId) -> Result<&SceneNode, ConversionError> {
        self.get(id)
            .ok_or_else(|| ConversionError::MissingNode { id: id.clone() })
    }

    // ─── Transform accessors ────────────────────────────────────────────────

    pub fn world_matrix(&self, host: &impl HostScene, id: &ObjectId) -> Matrix4<f64> {
        host.world_transform(id)
    }

    /// Parent world matrix, identity for roots.
    pub fn parent_matrix(&self, host: &impl HostScene, id: &ObjectId) -> Matrix4<f64> {
        self.get(id)
            .and_then(|node| node.parent.as_ref())
            .map_or_else(Matrix4::identity, |parent| host.world_transform(parent))
    }

    /// Pivot in engine space and engine units.
    ///
    /// Walks custom parent links, adding each node's translation relative to
    /// its parent (scale removed) to the parent's pivot. A root's pivot is its
    /// world translation.
    pub fn mc_pivot(&self, host: &impl HostScene, id: &ObjectId) -> Result<Vector3<f64>, ConversionError> {
        let mut pivot = Vector3::zeros();
        let mut current = self.node(id)?;
        loop {
            let world = normalized(&host.world_transform(&current.id));
            match &current.parent {
                Some(parent_id) => {
                    let parent_world = normalized(&host.world_transform(parent_id));
                    let local = local_matrix(&parent_world, &world).unwrap_or(world);
                    pivot += swap_yz(&translation_of(&local)) * MINECRAFT_SCALE_FACTOR;
                    current = self.node(parent_id)?;
                }
                None => {
                    pivot += swap_yz(&translation_of(&world)) * MINECRAFT_SCALE_FACTOR;
                    return Ok(pivot);
                }
            }
        }
    }

    /// Cube size in engine space and units (world scale applied, inflate not removed).
    pub fn mc_size(&self, host: &impl HostScene, id: &ObjectId) -> Option<Vector3<f64>> {
        let (min, max) = host.bounding_box(id)?;
        let scale = scale_of(&host.world_transform(id));
        Some(swap_yz(&(max - min).component_mul(&scale)) * MINECRAFT_SCALE_FACTOR)
    }

    /// Offset of the cube's minimum corner from its pivot, engine space and units.
    pub fn mc_cube_offset(&self, host: &impl HostScene, id: &ObjectId) -> Option<Vector3<f64>> {
        let (min, _) = host.bounding_box(id)?;
        let scale = scale_of(&host.world_transform(id));
        Some(swap_yz(&min.component_mul(&scale)) * MINECRAFT_SCALE_FACTOR)
    }

    /// Engine rotation in degrees relative to the custom parent.
    pub fn mc_rotation(&self, host: &impl HostScene, id: &ObjectId) -> Vector3<f64> {
        let world = host.world_transform(id);
        match self.get(id).and_then(|node| node.parent.as_ref()) {
            Some(parent) => mc_rotation(&world, Some(&host.world_transform(parent))),
            None => mc_rotation(&world, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryObject, MemoryScene};
    use super::*;
    use crate::math::{compose, rotation_from_mc};

    #[test]
    fn given_every_flag_combination_when_classifying_then_table_is_followed() {
        // (has_parent, has_children, marker) -> (empty, mesh)
        let table = [
            ((false, false, false), (NodeKind::Bone, NodeKind::Both)),
            ((false, false, true), (NodeKind::Bone, NodeKind::Both)),
            ((false, true, false), (NodeKind::Bone, NodeKind::Both)),
            ((false, true, true), (NodeKind::Bone, NodeKind::Both)),
            ((true, false, false), (NodeKind::Locator, NodeKind::Cube)),
            ((true, false, true), (NodeKind::Bone, NodeKind::Both)),
            ((true, true, false), (NodeKind::Bone, NodeKind::Both)),
            ((true, true, true), (NodeKind::Bone, NodeKind::Both)),
        ];

        for ((parent, children, marker), (empty, mesh)) in table {
            assert_eq!(
                classify(HostObjectKind::Empty, parent, children, marker),
                Some(empty),
                "empty {parent} {children} {marker}"
            );
            assert_eq!(
                classify(HostObjectKind::Mesh, parent, children, marker),
                Some(mesh),
                "mesh {parent} {children} {marker}"
            );
        }
    }

    #[test]
    fn given_isolated_armature_bone_when_classifying_then_it_is_dropped() {
        assert_eq!(classify(HostObjectKind::Armature, false, false, false), None);
        assert_eq!(
            classify(HostObjectKind::Armature, true, false, false),
            Some(NodeKind::Bone)
        );
    }

    #[test]
    fn given_parented_cube_when_building_graph_then_links_and_kinds_are_resolved() {
        let mut scene = MemoryScene::default();
        scene.add(MemoryObject::empty("body", Matrix4::identity()).with_attribute(ATTR_IS_BONE, AttributeValue::Bool(true)));
        scene.add(
            MemoryObject::cube("body_cube", Matrix4::identity(), Vector3::repeat(-0.25), Vector3::repeat(0.25))
                .with_attribute(ATTR_PARENT, AttributeValue::Object(ObjectId::object("body"))),
        );
        scene.add(
            MemoryObject::empty("hand", Matrix4::new_translation(&Vector3::new(1.0, 0.0, 0.0)))
                .with_attribute(ATTR_PARENT, AttributeValue::Object(ObjectId::object("body"))),
        );

        let graph = build_scene_graph(&scene).expect("graph builds");

        let body = graph.get(&ObjectId::object("body")).expect("body node");
        assert_eq!(body.kind, NodeKind::Bone);
        assert_eq!(
            body.children,
            vec![ObjectId::object("body_cube"), ObjectId::object("hand")]
        );
        let cube = graph.get(&ObjectId::object("body_cube")).expect("cube node");
        assert_eq!(cube.kind, NodeKind::Cube);
        let hand = graph.get(&ObjectId::object("hand")).expect("hand node");
        assert_eq!(hand.kind, NodeKind::Locator);
    }

    #[test]
    fn given_duplicate_bone_names_when_building_graph_then_conflict_is_reported() {
        let mut scene = MemoryScene::default();
        scene.add(MemoryObject::empty("arm", Matrix4::identity()));
        scene.add(MemoryObject::armature(
            "rig",
            Matrix4::identity(),
            vec![
                ("arm", None, Matrix4::identity()),
                ("hand", Some("arm"), Matrix4::identity()),
            ],
        ));

        let error = build_scene_graph(&scene).expect_err("names collide");

        assert_eq!(error, ConversionError::NameConflict { name: "arm".to_string() });
    }

    #[test]
    fn given_armature_with_helper_bone_when_building_graph_then_helper_is_ignored() {
        let mut scene = MemoryScene::default();
        scene.add(MemoryObject::armature(
            "rig",
            Matrix4::identity(),
            vec![
                ("root", None, Matrix4::identity()),
                ("leg", Some("root"), Matrix4::identity()),
                ("ik_target", None, Matrix4::identity()),
            ],
        ));

        let graph = build_scene_graph(&scene).expect("graph builds");

        assert_eq!(graph.len(), 2);
        assert!(graph.get(&ObjectId::bone("rig", "ik_target")).is_none());
        let leg = graph.get(&ObjectId::bone("rig", "leg")).expect("leg node");
        assert_eq!(leg.parent, Some(ObjectId::bone("rig", "root")));
    }

    #[test]
    fn given_parent_cycle_when_building_graph_then_cycle_is_rejected() {
        let mut scene = MemoryScene::default();
        scene.add(
            MemoryObject::empty("a", Matrix4::identity())
                .with_attribute(ATTR_PARENT, AttributeValue::Object(ObjectId::object("b"))),
        );
        scene.add(
            MemoryObject::empty("b", Matrix4::identity())
                .with_attribute(ATTR_PARENT, AttributeValue::Object(ObjectId::object("a"))),
        );

        let error = build_scene_graph(&scene).expect_err("cycle detected");

        assert!(matches!(error, ConversionError::ParentCycle { .. }));
    }

    #[test]
    fn given_rotated_parent_when_computing_pivot_then_local_offsets_accumulate() {
        let parent_world = compose(
            &Vector3::new(0.0, 0.0, 1.0),
            &rotation_from_mc(&Vector3::new(0.0, 90.0, 0.0)),
            &Vector3::repeat(1.0),
        );
        let child_world = parent_world * Matrix4::new_translation(&Vector3::new(0.5, 0.0, 0.0));
        let mut scene = MemoryScene::default();
        scene.add(MemoryObject::empty("parent", parent_world));
        scene.add(
            MemoryObject::empty("child", child_world)
                .with_attribute(ATTR_IS_BONE, AttributeValue::Bool(true))
                .with_attribute(ATTR_PARENT, AttributeValue::Object(ObjectId::object("parent"))),
        );
        let graph = build_scene_graph(&scene).expect("graph builds");

        let pivot = graph
            .mc_pivot(&scene, &ObjectId::object("child"))
            .expect("pivot");

        assert!((pivot - Vector3::new(8.0, 16.0, 0.0)).norm() < 1e-9);
    }
}
