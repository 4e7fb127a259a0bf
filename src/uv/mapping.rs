//! Automatic UV mapping of scene cubes and template texture painting.

use std::collections::HashMap;

use image::{Rgb, Rgb32FImage, Rgba, RgbaImage};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Packable, UvMcCube, UvPacker};
use crate::math::vect_json;
use crate::model::default_face_rects;
use crate::scene::cuboid::FaceRect;
use crate::scene::memory::MemoryScene;
use crate::scene::{ATTR_UV, AttributeValue, HostScene, ObjectId, SceneGraph};
use crate::texture::{TextureError, UvGroup, apply_masks, default_side_masks};

/// Settings of automatic UV mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UvMappingOptions {
    pub texture_width: u32,
    /// `None` sizes the texture to fit.
    pub texture_height: Option<u32>,
    pub allow_expanding: bool,
    /// Keeps UVs stored on cubes instead of planning them again.
    pub read_existing_uvs: bool,
    /// Texture pixels per engine UV unit in painted templates.
    pub resolution: u32,
}

impl Default for UvMappingOptions {
    fn default() -> Self {
        Self {
            texture_width: 64,
            texture_height: None,
            allow_expanding: true,
            read_existing_uvs: false,
            resolution: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not enough texture space to map {cubes} cube layouts on a {width}x{height} texture")]
pub struct NotEnoughTextureSpace {
    pub cubes: usize,
    pub width: u32,
    pub height: String,
}

/// One packed layout shared by all cubes of the same size and UV-group.
#[derive(Debug, Clone, PartialEq)]
pub struct CubeSlot {
    pub cube: UvMcCube,
    pub objects: Vec<ObjectId>,
    pub uv_group: Option<String>,
}

/// Receives planned UVs.
pub trait UvWriter {
    fn write_cube_uv(&mut self, id: &ObjectId, uv: [f64; 2], faces: &[FaceRect; 6], texture_size: [f64; 2]);
}

impl UvWriter for MemoryScene {
    fn write_cube_uv(&mut self, id: &ObjectId, uv: [f64; 2], faces: &[FaceRect; 6], texture_size: [f64; 2]) {
        self.set_cube_uv(id, faces, texture_size);
        self.set_attribute(id, ATTR_UV, AttributeValue::Pair(uv));
    }
}

/// Planned texture: final size and the placed layouts.
#[derive(Debug, Clone, PartialEq)]
pub struct UvLayout {
    pub width: u32,
    pub height: u32,
    pub slots: Vec<CubeSlot>,
}

/// Layout size of a cube in whole pixels as `[width, height, depth]`.
///
/// Inflate is removed, each axis is raised to the object's minimal UV size
/// keeping its sign, and the result is truncated.
fn layout_size(host: &impl HostScene, graph: &SceneGraph, id: &ObjectId) -> Option<[i64; 3]> {
    let node = graph.get(id)?;
    let metadata = &node.metadata;
    let mut size = graph.mc_size(host, id)?.add_scalar(-2.0 * metadata.inflate);
    for (axis, min) in metadata.min_uv_size.iter().enumerate() {
        let value = size[axis];
        size[axis] = value.abs().max(*min).copysign(value);
    }
    let [x, y, z] = vect_json(&size);
    Some([x as i64, y as i64, z as i64])
}

/// Groups the cubes of the graph into packing slots.
///
/// Cubes sharing a UV-group and layout size share one slot. With
/// `read_existing`, a slot whose first cube stores a UV is already mapped.
pub fn get_uv_mc_cubes(host: &impl HostScene, graph: &SceneGraph, read_existing: bool) -> Vec<CubeSlot> {
    let mut slots: Vec<CubeSlot> = Vec::new();
    let mut index: HashMap<([i64; 3], Option<String>), usize> = HashMap::new();
    for node in graph.iter().filter(|node| node.kind.has_cube()) {
        let Some(size @ [width, height, depth]) = layout_size(host, graph, &node.id) else {
            continue;
        };
        let key = (size, node.metadata.uv_group.clone());
        if let Some(&slot) = index.get(&key) {
            slots[slot].objects.push(node.id.clone());
            continue;
        }
        let cube = match node.metadata.uv.filter(|_| read_existing) {
            Some([u, v]) => UvMcCube::mapped(width, depth, height, [u.round() as i64, v.round() as i64]),
            None => UvMcCube::new(width, depth, height),
        };
        index.insert(key, slots.len());
        slots.push(CubeSlot {
            cube,
            objects: vec![node.id.clone()],
            uv_group: node.metadata.uv_group.clone(),
        });
    }
    slots
}

/// Plans UVs of every cube in the graph and writes them to the host.
///
/// # Errors
/// [`NotEnoughTextureSpace`] when the layouts do not fit; nothing is written.
pub fn set_uvs<H: HostScene + UvWriter>(
    host: &mut H,
    graph: &SceneGraph,
    options: &UvMappingOptions,
) -> Result<UvLayout, NotEnoughTextureSpace> {
    let mut slots = get_uv_mc_cubes(host, graph, options.read_existing_uvs);
    let mut cubes: Vec<UvMcCube> = slots.iter().map(|slot| slot.cube).collect();
    let mut packer = UvPacker::new(
        options.texture_width,
        options.texture_height,
        options.allow_expanding,
    );
    if !packer.plan(&mut cubes) {
        return Err(NotEnoughTextureSpace {
            cubes: cubes.len(),
            width: packer.width,
            height: packer
                .height
                .map_or_else(|| "unbounded".to_string(), |height| height.to_string()),
        });
    }
    let width = packer.width;
    let height = packer.height.unwrap_or(0);
    let texture_size = [f64::from(width), f64::from(height)];

    for (slot, cube) in slots.iter_mut().zip(cubes) {
        slot.cube = cube;
        let [u, v] = cube.uv().map(|c| c as f64);
        let size = [cube.width, cube.height, cube.depth].map(|s| s as f64);
        for id in &slot.objects {
            let mirror = graph.get(id).is_some_and(|node| node.metadata.mirror);
            let faces = default_face_rects(size, [u, v], mirror);
            host.write_cube_uv(id, [u, v], &faces, texture_size);
            debug!("mapped {id} at [{u}, {v}]");
        }
    }
    info!("mapped {} cube layouts on a {width}x{height} texture", slots.len());
    Ok(UvLayout {
        width,
        height,
        slots,
    })
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Paints every layout of `layout` with its UV-group masks.
///
/// Faces of cubes without a group, or with an unknown group, get a solid
/// default color per side. Unused texture space stays transparent.
///
/// # Errors
/// Returns an error when a UV-group holds an invalid mask.
pub fn paint_template(layout: &UvLayout, groups: &[UvGroup], resolution: u32) -> Result<RgbaImage, TextureError> {
    let resolution = resolution.max(1);
    let mut image = RgbaImage::new(layout.width * resolution, layout.height * resolution);
    for slot in &layout.slots {
        let group = slot
            .uv_group
            .as_deref()
            .and_then(|name| groups.iter().find(|group| group.name == name));
        if let (Some(name), None) = (&slot.uv_group, group) {
            warn!("unknown UV-group '{name}', painting default colors");
        }
        let masks = match group {
            Some(group) => group.masks()?,
            None => default_side_masks(),
        };
        for (side, side_masks) in slot.cube.sides().iter().zip(&masks) {
            let ((u0, u1), (v0, v1)) = side.bounds();
            let width = u32::try_from(u1 - u0).unwrap_or(0) * resolution;
            let height = u32::try_from(v1 - v0).unwrap_or(0) * resolution;
            if width == 0 || height == 0 || u0 < 0 || v0 < 0 {
                continue;
            }
            let mut face = Rgb32FImage::from_pixel(width, height, Rgb([1.0, 1.0, 1.0]));
            apply_masks(&mut face, side_masks);
            let origin = [u0 as u32 * resolution, v0 as u32 * resolution];
            for (x, y, pixel) in face.enumerate_pixels() {
                let (px, py) = (origin[0] + x, origin[1] + y);
                if px < image.width() && py < image.height() {
                    let [r, g, b] = pixel.0;
                    image.put_pixel(px, py, Rgba([to_byte(r), to_byte(g), to_byte(b), 255]));
                }
            }
        }
    }
    Ok(image)
}
