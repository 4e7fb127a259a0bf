//! In-memory host scene.
//!
//! Stands in for a 3D authoring tool: it stores objects, armatures and their
//! keyed poses, answers [`HostScene`] queries and accepts objects created by
//! the model importer.

use std::collections::HashMap;

use log::debug;
use nalgebra::{Matrix4, UnitQuaternion, Vector3};

use super::cuboid::{FaceRect, cuboid_mesh};
use super::{
    ATTR_INFLATE, ATTR_IS_BONE, ATTR_MIRROR, ATTR_PARENT, ATTR_UV, ArmatureBone, AttributeValue,
    HostObjectKind, HostScene, Interpolation, Keyframe, MeshData, ObjectId,
};
use crate::math::{compose, rotation_of, scale_of, translation_of};
use crate::model::import::{BoneBuild, CubeBuild, HostBuilder, LocatorBuild};

/// Pose of an object or bone at one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseKey {
    pub frame: f64,
    /// World matrix for objects, armature-space matrix for bones.
    pub matrix: Matrix4<f64>,
    pub interpolation: Interpolation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryBone {
    pub name: String,
    pub parent: Option<String>,
    /// Rest matrix in armature space.
    pub matrix: Matrix4<f64>,
    pub attributes: HashMap<String, AttributeValue>,
    pub keys: Vec<PoseKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryObject {
    pub name: String,
    pub kind: HostObjectKind,
    pub world: Matrix4<f64>,
    pub mesh: Option<MeshData>,
    pub attributes: HashMap<String, AttributeValue>,
    pub bones: Vec<MemoryBone>,
    pub keys: Vec<PoseKey>,
}

impl MemoryObject {
    fn new(name: impl Into<String>, kind: HostObjectKind, world: Matrix4<f64>) -> Self {
        Self {
            name: name.into(),
            kind,
            world,
            mesh: None,
            attributes: HashMap::new(),
            bones: Vec::new(),
            keys: Vec::new(),
        }
    }

    pub fn empty(name: impl Into<String>, world: Matrix4<f64>) -> Self {
        Self::new(name, HostObjectKind::Empty, world)
    }

    /// Cuboid mesh object spanning `min..max` in its local space, without UVs.
    pub fn cube(name: impl Into<String>, world: Matrix4<f64>, min: Vector3<f64>, max: Vector3<f64>) -> Self {
        Self::mesh(name, world, cuboid_mesh(&min, &max, None))
    }

    pub fn mesh(name: impl Into<String>, world: Matrix4<f64>, mesh: MeshData) -> Self {
        let mut object = Self::new(name, HostObjectKind::Mesh, world);
        object.mesh = Some(mesh);
        object
    }

    /// Armature with `(name, parent, armature-space matrix)` bones.
    pub fn armature(
        name: impl Into<String>,
        world: Matrix4<f64>,
        bones: Vec<(&str, Option<&str>, Matrix4<f64>)>,
    ) -> Self {
        let mut object = Self::new(name, HostObjectKind::Armature, world);
        object.bones = bones
            .into_iter()
            .map(|(name, parent, matrix)| MemoryBone {
                name: name.to_string(),
                parent: parent.map(str::to_string),
                matrix,
                attributes: HashMap::new(),
                keys: Vec::new(),
            })
            .collect();
        object
    }

    pub fn with_attribute(mut self, key: &str, value: AttributeValue) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    fn bone(&self, name: &str) -> Option<&MemoryBone> {
        self.bones.iter().find(|bone| bone.name == name)
    }
}

/// Scene of [`MemoryObject`]s. Every object counts as selected.
#[derive(Debug, Clone, Default)]
pub struct MemoryScene {
    objects: Vec<MemoryObject>,
    frame: f64,
}

impl MemoryScene {
    /// Adds an object, renaming it with a numeric suffix when the name is taken.
    pub fn add(&mut self, mut object: MemoryObject) -> ObjectId {
        object.name = self.unique_name(&object.name);
        let id = ObjectId::object(object.name.clone());
        self.objects.push(object);
        id
    }

    pub fn objects(&self) -> &[MemoryObject] {
        &self.objects
    }

    pub fn frame(&self) -> f64 {
        self.frame
    }

    fn unique_name(&self, name: &str) -> String {
        let taken = |candidate: &str| self.objects.iter().any(|object| object.name == candidate);
        if !taken(name) {
            return name.to_string();
        }
        (1..)
            .map(|i| format!("{name}.{i:03}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| name.to_string())
    }

    fn object(&self, name: &str) -> Option<&MemoryObject> {
        self.objects.iter().find(|object| object.name == name)
    }

    fn object_mut(&mut self, name: &str) -> Option<&mut MemoryObject> {
        self.objects.iter_mut().find(|object| object.name == name)
    }

    pub fn set_attribute(&mut self, id: &ObjectId, key: &str, value: AttributeValue) {
        let Some(object) = self.object_mut(&id.name) else {
            return;
        };
        match &id.bone_name {
            Some(bone) => {
                if let Some(bone) = object.bones.iter_mut().find(|b| &b.name == bone) {
                    bone.attributes.insert(key.to_string(), value);
                }
            }
            None => {
                object.attributes.insert(key.to_string(), value);
            }
        }
    }

    pub fn mesh_mut(&mut self, id: &ObjectId) -> Option<&mut MeshData> {
        self.object_mut(&id.name)?.mesh.as_mut()
    }

    /// Replaces the UVs of a cuboid mesh with the given engine-pixel rectangles.
    pub fn set_cube_uv(&mut self, id: &ObjectId, faces: &[FaceRect; 6], texture_size: [f64; 2]) {
        let Some(mesh) = self.mesh_mut(id) else {
            return;
        };
        let Some((min, max)) = mesh_bounds(mesh) else {
            return;
        };
        *mesh = cuboid_mesh(&min, &max, Some((faces, texture_size)));
    }

    /// Keys the pose of an object (world matrix) or bone (armature-space matrix).
    pub fn insert_keyframe(
        &mut self,
        id: &ObjectId,
        frame: f64,
        matrix: Matrix4<f64>,
        interpolation: Interpolation,
    ) {
        let Some(object) = self.object_mut(&id.name) else {
            return;
        };
        let keys = match &id.bone_name {
            Some(bone) => match object.bones.iter_mut().find(|b| &b.name == bone) {
                Some(bone) => &mut bone.keys,
                None => return,
            },
            None => &mut object.keys,
        };
        keys.retain(|key| key.frame != frame);
        keys.push(PoseKey {
            frame,
            matrix,
            interpolation,
        });
        keys.sort_by(|a, b| a.frame.total_cmp(&b.frame));
    }
}

fn mesh_bounds(mesh: &MeshData) -> Option<(Vector3<f64>, Vector3<f64>)> {
    let first = mesh.vertices.first()?;
    Some(
        mesh.vertices
            .iter()
            .fold((*first, *first), |(min, max), v| (min.inf(v), max.sup(v))),
    )
}

/// Pose of a keyed transform at `frame`; `rest` when nothing is keyed.
fn sample(keys: &[PoseKey], rest: &Matrix4<f64>, frame: f64) -> Matrix4<f64> {
    let (Some(first), Some(last)) = (keys.first(), keys.last()) else {
        return *rest;
    };
    if frame <= first.frame {
        return first.matrix;
    }
    if frame >= last.frame {
        return last.matrix;
    }
    let Some(index) = keys.iter().position(|key| key.frame > frame) else {
        return last.matrix;
    };
    let (a, b) = (&keys[index - 1], &keys[index]);
    let t = (frame - a.frame) / (b.frame - a.frame);
    let t = match a.interpolation {
        Interpolation::Step => return a.matrix,
        Interpolation::Linear => t,
        Interpolation::Smooth => t * t * (3.0 - 2.0 * t),
    };
    blend(&a.matrix, &b.matrix, t)
}

fn blend(a: &Matrix4<f64>, b: &Matrix4<f64>, t: f64) -> Matrix4<f64> {
    let qa = UnitQuaternion::from_rotation_matrix(&rotation_of(a));
    let qb = UnitQuaternion::from_rotation_matrix(&rotation_of(b));
    let rotation = qa.try_slerp(&qb, t, 1e-9).unwrap_or(qa);
    compose(
        &translation_of(a).lerp(&translation_of(b), t),
        &rotation.to_rotation_matrix(),
        &scale_of(a).lerp(&scale_of(b), t),
    )
}

impl HostScene for MemoryScene {
    fn selected_objects(&self) -> Vec<ObjectId> {
        self.objects
            .iter()
            .map(|object| ObjectId::object(object.name.clone()))
            .collect()
    }

    fn object_kind(&self, id: &ObjectId) -> HostObjectKind {
        self.object(&id.name)
            .map_or(HostObjectKind::Other, |object| object.kind)
    }

    fn world_transform(&self, id: &ObjectId) -> Matrix4<f64> {
        let Some(object) = self.object(&id.name) else {
            return Matrix4::identity();
        };
        let world = sample(&object.keys, &object.world, self.frame);
        match &id.bone_name {
            Some(bone) => object.bone(bone).map_or(world, |bone| {
                world * sample(&bone.keys, &bone.matrix, self.frame)
            }),
            None => world,
        }
    }

    fn bounding_box(&self, id: &ObjectId) -> Option<(Vector3<f64>, Vector3<f64>)> {
        if id.bone_name.is_some() {
            return None;
        }
        mesh_bounds(self.object(&id.name)?.mesh.as_ref()?)
    }

    fn mesh(&self, id: &ObjectId) -> Option<MeshData> {
        if id.bone_name.is_some() {
            return None;
        }
        self.object(&id.name)?.mesh.clone()
    }

    fn read_custom_attribute(&self, id: &ObjectId, key: &str) -> Option<AttributeValue> {
        let object = self.object(&id.name)?;
        let attributes = match &id.bone_name {
            Some(bone) => &object.bone(bone)?.attributes,
            None => &object.attributes,
        };
        attributes.get(key).cloned()
    }

    fn armature_bones(&self, id: &ObjectId) -> Vec<ArmatureBone> {
        self.object(&id.name)
            .map(|object| {
                object
                    .bones
                    .iter()
                    .map(|bone| ArmatureBone {
                        name: bone.name.clone(),
                        parent: bone.parent.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn keyframes(&self, id: &ObjectId) -> Vec<Keyframe> {
        let Some(object) = self.object(&id.name) else {
            return Vec::new();
        };
        let mut keys: Vec<&PoseKey> = object.keys.iter().collect();
        if let Some(bone) = id.bone_name.as_deref().and_then(|bone| object.bone(bone)) {
            keys.extend(&bone.keys);
        }
        keys.into_iter()
            .map(|key| Keyframe {
                frame: key.frame,
                interpolation: key.interpolation,
            })
            .collect()
    }

    fn set_frame(&mut self, frame: f64) {
        self.frame = frame;
    }
}

impl HostBuilder for MemoryScene {
    fn build_bone(&mut self, bone: &BoneBuild) -> ObjectId {
        let mut object =
            MemoryObject::empty(&bone.name, bone.world).with_attribute(ATTR_IS_BONE, AttributeValue::Bool(true));
        if let Some(parent) = &bone.parent {
            object = object.with_attribute(ATTR_PARENT, AttributeValue::Object(parent.clone()));
        }
        let id = self.add(object);
        debug!("created bone object {id}");
        id
    }

    fn build_cube(&mut self, cube: &CubeBuild) -> ObjectId {
        let mesh = cuboid_mesh(&cube.min, &cube.max, Some((&cube.faces, cube.texture_size)));
        let mut object = MemoryObject::mesh(&cube.name, cube.world, mesh)
            .with_attribute(ATTR_PARENT, AttributeValue::Object(cube.parent.clone()));
        if cube.mirror {
            object = object.with_attribute(ATTR_MIRROR, AttributeValue::Bool(true));
        }
        if cube.inflate != 0.0 {
            object = object.with_attribute(ATTR_INFLATE, AttributeValue::Number(cube.inflate));
        }
        if let Some(uv) = cube.uv {
            object = object.with_attribute(ATTR_UV, AttributeValue::Pair(uv));
        }
        self.add(object)
    }

    fn build_locator(&mut self, locator: &LocatorBuild) -> ObjectId {
        self.add(
            MemoryObject::empty(&locator.name, locator.world)
                .with_attribute(ATTR_PARENT, AttributeValue::Object(locator.parent.clone())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_taken_name_when_adding_then_numeric_suffix_is_appended() {
        let mut scene = MemoryScene::default();

        let first = scene.add(MemoryObject::empty("bone", Matrix4::identity()));
        let second = scene.add(MemoryObject::empty("bone", Matrix4::identity()));
        let third = scene.add(MemoryObject::empty("bone", Matrix4::identity()));

        assert_eq!(first.name, "bone");
        assert_eq!(second.name, "bone.001");
        assert_eq!(third.name, "bone.002");
    }

    #[test]
    fn given_linear_keys_when_sampling_between_then_translation_is_interpolated() {
        let mut scene = MemoryScene::default();
        let id = scene.add(MemoryObject::empty("mover", Matrix4::identity()));
        scene.insert_keyframe(&id, 0.0, Matrix4::identity(), Interpolation::Linear);
        scene.insert_keyframe(
            &id,
            10.0,
            Matrix4::new_translation(&Vector3::new(2.0, 0.0, 0.0)),
            Interpolation::Linear,
        );

        scene.set_frame(5.0);

        let position = translation_of(&scene.world_transform(&id));
        assert!((position - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn given_step_key_when_sampling_between_then_previous_pose_is_held() {
        let mut scene = MemoryScene::default();
        let id = scene.add(MemoryObject::empty("mover", Matrix4::identity()));
        scene.insert_keyframe(&id, 0.0, Matrix4::identity(), Interpolation::Step);
        scene.insert_keyframe(
            &id,
            10.0,
            Matrix4::new_translation(&Vector3::new(2.0, 0.0, 0.0)),
            Interpolation::Linear,
        );

        scene.set_frame(9.0);

        assert_eq!(scene.world_transform(&id), Matrix4::identity());
    }

    #[test]
    fn given_armature_bone_when_reading_world_then_armature_world_is_applied() {
        let mut scene = MemoryScene::default();
        let armature = scene.add(MemoryObject::armature(
            "rig",
            Matrix4::new_translation(&Vector3::new(0.0, 0.0, 1.0)),
            vec![("root", None, Matrix4::new_translation(&Vector3::new(1.0, 0.0, 0.0)))],
        ));

        let world = scene.world_transform(&ObjectId::bone(armature.name, "root"));

        assert!((translation_of(&world) - Vector3::new(1.0, 0.0, 1.0)).norm() < 1e-12);
    }
}
