use log::{info, warn};
use nalgebra::Vector3;
use serde_json::{Map, Value, json};

use super::{Face, FaceRect, ModelExportOptions, default_face_rects};
use crate::error::ConversionError;
use crate::math::{mc_rotation, round_to, vect_json};
use crate::scene::cuboid::{host_uv_to_pixels, solve_cube_faces, validate_rectangle_uv};
use crate::scene::{HostScene, NodeKind, SceneGraph, SceneNode};

/// Result of a model export: the whole model file and non-fatal problems.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelExport {
    pub json: Value,
    pub warnings: Vec<String>,
}

/// Converts the scene graph into a model file with a single geometry.
///
/// Bones come out in graph order. Per-cube problems (bad UV, non-cuboid mesh)
/// never abort the export; they are collected in [`ModelExport::warnings`].
///
/// # Errors
/// [`ConversionError::MissingNode`] when a parent link points outside the graph.
pub fn export_model(
    host: &impl HostScene,
    graph: &SceneGraph,
    options: &ModelExportOptions,
) -> Result<ModelExport, ConversionError> {
    let mut warnings = Vec::new();
    let mut bones = Vec::new();
    for node in graph.iter().filter(|node| node.kind.is_bone()) {
        bones.push(export_bone(host, graph, node, options, &mut warnings)?);
    }
    for warning in &warnings {
        warn!("{warning}");
    }
    info!(
        "exported geometry.{} with {} bones and {} warnings",
        options.model_name,
        bones.len(),
        warnings.len()
    );

    let mut description = Map::new();
    description.insert(
        "identifier".into(),
        json!(format!("geometry.{}", options.model_name)),
    );
    if options.texture_width > 0 {
        description.insert("texture_width".into(), json!(options.texture_width));
    }
    if options.texture_height > 0 {
        description.insert("texture_height".into(), json!(options.texture_height));
    }
    description.insert(
        "visible_bounds_width".into(),
        json!(round_to(options.visible_bounds_width, 3)),
    );
    description.insert(
        "visible_bounds_height".into(),
        json!(round_to(options.visible_bounds_height, 3)),
    );
    description.insert(
        "visible_bounds_offset".into(),
        json!(vect_json(&Vector3::from(options.visible_bounds_offset))),
    );

    Ok(ModelExport {
        json: json!({
            "format_version": options.format_version,
            "minecraft:geometry": [{
                "description": description,
                "bones": bones,
            }],
        }),
        warnings,
    })
}

/// Rotation for the file: rounded, with `-180` written as `180`.
fn rotation_json(rotation: &Vector3<f64>) -> [f64; 3] {
    vect_json(rotation).map(|angle| if angle == -180.0 { 180.0 } else { angle })
}

fn export_bone(
    host: &impl HostScene,
    graph: &SceneGraph,
    node: &SceneNode,
    options: &ModelExportOptions,
    warnings: &mut Vec<String>,
) -> Result<Value, ConversionError> {
    let mut bone = Map::new();
    bone.insert("name".into(), json!(node.name()));
    if let Some(parent) = node.parent.as_ref().and_then(|id| graph.get(id)) {
        bone.insert("parent".into(), json!(parent.name()));
    }
    bone.insert(
        "pivot".into(),
        json!(vect_json(&graph.mc_pivot(host, &node.id)?)),
    );
    bone.insert(
        "rotation".into(),
        json!(rotation_json(&graph.mc_rotation(host, &node.id))),
    );

    let mut cube_nodes = Vec::new();
    if node.kind == NodeKind::Both {
        cube_nodes.push(node);
    }
    let mut locators = Map::new();
    for child in node.children.iter().filter_map(|id| graph.get(id)) {
        match child.kind {
            NodeKind::Cube => cube_nodes.push(child),
            NodeKind::Locator => {
                let offset = graph.mc_pivot(host, &child.id)?
                    + graph.mc_cube_offset(host, &child.id).unwrap_or_else(Vector3::zeros);
                let world = host.world_transform(&child.id);
                let rotation = rotation_json(&mc_rotation(
                    &world,
                    Some(&host.world_transform(&node.id)),
                ));
                let value = if rotation == [0.0; 3] {
                    json!(vect_json(&offset))
                } else {
                    json!({"offset": vect_json(&offset), "rotation": rotation})
                };
                locators.insert(child.name().to_string(), value);
            }
            NodeKind::Bone | NodeKind::Both => {}
        }
    }

    let mut cubes = Vec::new();
    for cube in cube_nodes {
        match export_cube(host, graph, node, cube, options, warnings)? {
            Some(value) => cubes.push(value),
            None => warnings.push(format!("{}: object has no geometry and was skipped", cube.id)),
        }
    }

    if !locators.is_empty() {
        bone.insert("locators".into(), Value::Object(locators));
    }
    if !cubes.is_empty() {
        bone.insert("cubes".into(), Value::Array(cubes));
    }
    Ok(Value::Object(bone))
}

fn export_cube(
    host: &impl HostScene,
    graph: &SceneGraph,
    bone: &SceneNode,
    cube: &SceneNode,
    options: &ModelExportOptions,
    warnings: &mut Vec<String>,
) -> Result<Option<Value>, ConversionError> {
    let (Some(size), Some(offset)) = (
        graph.mc_size(host, &cube.id),
        graph.mc_cube_offset(host, &cube.id),
    ) else {
        return Ok(None);
    };
    let inflate = cube.metadata.inflate;
    let pivot = graph.mc_pivot(host, &cube.id)?;
    let size = size - Vector3::repeat(inflate * 2.0);
    let origin = pivot + offset + Vector3::repeat(inflate);
    let rotation = mc_rotation(
        &host.world_transform(&cube.id),
        Some(&host.world_transform(&bone.id)),
    );

    let (uv, mirror) = cube_uv(host, cube, &size, options, warnings);
    let mut result = Map::new();
    result.insert("uv".into(), uv);
    result.insert("size".into(), json!(vect_json(&size)));
    result.insert("origin".into(), json!(vect_json(&origin)));
    result.insert("pivot".into(), json!(vect_json(&pivot)));
    result.insert("rotation".into(), json!(rotation_json(&rotation)));
    if inflate != 0.0 {
        result.insert("inflate".into(), json!(round_to(inflate, 3)));
    }
    if mirror {
        result.insert("mirror".into(), json!(true));
    }
    Ok(Some(Value::Object(result)))
}

// ─── UV ─────────────────────────────────────────────────────────────────────

/// UV entry of a cube and its mirror flag.
///
/// Mesh UVs win over the stored offset: a standard box layout is written as
/// `[u, v]`, anything else face by face.
fn cube_uv(
    host: &impl HostScene,
    cube: &SceneNode,
    size: &Vector3<f64>,
    options: &ModelExportOptions,
    warnings: &mut Vec<String>,
) -> (Value, bool) {
    let stored = || {
        let uv = cube.metadata.uv.unwrap_or([0.0, 0.0]);
        (json!(uv.map(|value| round_to(value, 3))), cube.metadata.mirror)
    };
    let Some(mesh) = host.mesh(&cube.id) else {
        return stored();
    };
    if mesh.uvs.is_none() {
        return stored();
    }
    let faces = match solve_cube_faces(&mesh) {
        Ok(faces) => faces,
        Err(reason) => {
            warnings.push(format!(
                "{}: {reason}, using the stored UV offset instead",
                cube.id
            ));
            return stored();
        }
    };

    let texture_size = options.texture_size();
    let mut rects = [FaceRect::default(); 6];
    let mut per_face = Map::new();
    let mut all_valid = true;
    for face in Face::ALL {
        let Some(corners) = faces.uv_corners(&mesh, face) else {
            return stored();
        };
        let left_up = host_uv_to_pixels(corners[3], texture_size);
        let right_down = host_uv_to_pixels(corners[1], texture_size);
        rects[face.index()] = FaceRect::new(
            left_up,
            [right_down[0] - left_up[0], right_down[1] - left_up[1]],
        );

        let outside = corners
            .iter()
            .all(|corner| corner.iter().any(|value| !(0.0..=1.0).contains(value)));
        if outside {
            all_valid = false;
            continue;
        }
        if !validate_rectangle_uv(&corners) {
            all_valid = false;
            warnings.push(format!(
                "{}: {} face has invalid UV-mapping and was dropped",
                cube.id,
                face.key()
            ));
            continue;
        }
        let rect = rects[face.index()];
        per_face.insert(
            face.key().to_string(),
            json!({
                "uv": rect.uv.map(|value| round_to(value, 3)),
                "uv_size": rect.uv_size.map(|value| round_to(value, 3)),
            }),
        );
    }

    if all_valid {
        if let Some((uv, mirror)) = detect_default_layout(&rects, size) {
            return (json!(uv.map(|value| round_to(value, 3))), mirror);
        }
    }
    (Value::Object(per_face), false)
}

/// Recognizes the standard box layout (plain or mirrored) of a cube.
///
/// # Returns
/// The layout offset and mirror flag, or `None` when any face is elsewhere.
pub fn detect_default_layout(rects: &[FaceRect; 6], size: &Vector3<f64>) -> Option<([f64; 2], bool)> {
    let mut min = [f64::INFINITY; 2];
    for rect in rects {
        for axis in 0..2 {
            min[axis] = min[axis]
                .min(rect.uv[axis])
                .min(rect.uv[axis] + rect.uv_size[axis]);
        }
    }
    let size = vect_json(size);
    for mirror in [false, true] {
        let expected = default_face_rects(size, min, mirror);
        if expected.iter().zip(rects).all(|(a, b)| a.approx_eq(b)) {
            return Some((min, mirror));
        }
    }
    None
}
