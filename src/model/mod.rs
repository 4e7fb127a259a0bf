//! Engine model geometry: shared records plus the exporter and importer.

pub mod export;
pub mod import;

use serde::{Deserialize, Serialize};

pub use crate::scene::cuboid::{Face, FaceRect};

pub const DEFAULT_FORMAT_VERSION: &str = "1.16.0";

/// Settings of the model exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelExportOptions {
    pub model_name: String,
    pub format_version: String,
    pub texture_width: u32,
    pub texture_height: u32,
    pub visible_bounds_width: f64,
    pub visible_bounds_height: f64,
    pub visible_bounds_offset: [f64; 3],
}

impl Default for ModelExportOptions {
    fn default() -> Self {
        Self {
            model_name: "model".to_string(),
            format_version: DEFAULT_FORMAT_VERSION.to_string(),
            texture_width: 64,
            texture_height: 64,
            visible_bounds_width: 10.0,
            visible_bounds_height: 10.0,
            visible_bounds_offset: [0.0, 2.0, 0.0],
        }
    }
}

impl ModelExportOptions {
    pub fn texture_size(&self) -> [f64; 2] {
        [f64::from(self.texture_width), f64::from(self.texture_height)]
    }
}

/// Texture mapping of one cube as written in the engine file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CubeUv {
    /// Offset of the standard box layout; face positions derive from the size.
    Default { uv: [f64; 2] },
    /// Explicit rectangle per face; missing faces are untextured.
    PerFace(Vec<(Face, FaceRect)>),
}

/// Face rectangles of the standard box layout for a cube of `(w, h, d)` pixels.
///
/// ```text
///   up down          mirrored:   up down
/// east north west south        west north east south
/// ```
///
/// With `mirror`, east and west swap places and every face is flipped along U.
/// Sizes are floored the way the engine does.
pub fn default_face_rects(size: [f64; 3], uv: [f64; 2], mirror: bool) -> [FaceRect; 6] {
    let [w, h, d] = size.map(f64::floor);
    let [u, v] = uv;
    let side_a = FaceRect::new([u, v + d], [d, h]);
    let side_b = FaceRect::new([u + d + w, v + d], [d, h]);
    let (east, west) = if mirror { (side_b, side_a) } else { (side_a, side_b) };
    let mut rects = [FaceRect::default(); 6];
    rects[Face::North.index()] = FaceRect::new([u + d, v + d], [w, h]);
    rects[Face::East.index()] = east;
    rects[Face::South.index()] = FaceRect::new([u + 2.0 * d + w, v + d], [w, h]);
    rects[Face::West.index()] = west;
    rects[Face::Up.index()] = FaceRect::new([u + d, v], [w, d]);
    rects[Face::Down.index()] = FaceRect::new([u + d + w, v], [w, d]);
    if mirror {
        for rect in &mut rects {
            *rect = rect.flipped_u();
        }
    }
    rects
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_cube_size_when_building_default_layout_then_faces_follow_box_pattern() {
        let rects = default_face_rects([4.0, 3.0, 2.0], [10.0, 20.0], false);

        assert_eq!(rects[Face::East.index()], FaceRect::new([10.0, 22.0], [2.0, 3.0]));
        assert_eq!(rects[Face::North.index()], FaceRect::new([12.0, 22.0], [4.0, 3.0]));
        assert_eq!(rects[Face::West.index()], FaceRect::new([16.0, 22.0], [2.0, 3.0]));
        assert_eq!(rects[Face::South.index()], FaceRect::new([18.0, 22.0], [4.0, 3.0]));
        assert_eq!(rects[Face::Up.index()], FaceRect::new([12.0, 20.0], [4.0, 2.0]));
        assert_eq!(rects[Face::Down.index()], FaceRect::new([16.0, 20.0], [4.0, 2.0]));
    }

    #[test]
    fn given_mirror_when_building_default_layout_then_sides_swap_and_flip() {
        let rects = default_face_rects([4.0, 3.0, 2.0], [0.0, 0.0], true);

        assert_eq!(rects[Face::West.index()], FaceRect::new([2.0, 2.0], [-2.0, 3.0]));
        assert_eq!(rects[Face::East.index()], FaceRect::new([8.0, 2.0], [-2.0, 3.0]));
        assert_eq!(rects[Face::North.index()], FaceRect::new([6.0, 2.0], [-4.0, 3.0]));
    }

    #[test]
    fn given_fractional_size_when_building_default_layout_then_size_is_floored() {
        let rects = default_face_rects([4.9, 1.2, 2.7], [0.0, 0.0], false);

        assert_eq!(rects[Face::North.index()], FaceRect::new([2.0, 2.0], [4.0, 1.0]));
    }
}
