//! Cube mesh topology: which polygon is which engine face, and how its UV
//! corners are ordered.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::MeshData;

/// Engine cube face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Face {
    North,
    East,
    South,
    West,
    Up,
    Down,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::North,
        Face::East,
        Face::South,
        Face::West,
        Face::Up,
        Face::Down,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Face::North => "north",
            Face::East => "east",
            Face::South => "south",
            Face::West => "west",
            Face::Up => "up",
            Face::Down => "down",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Corners of the face in winding order.
    fn pattern(self) -> [&'static str; 4] {
        match self {
            Face::North => ["---", "+--", "+-+", "--+"],
            Face::East => ["--+", "-++", "-+-", "---"],
            Face::South => ["-++", "+++", "++-", "-+-"],
            Face::West => ["+--", "++-", "+++", "+-+"],
            Face::Up => ["--+", "+-+", "+++", "-++"],
            Face::Down => ["-+-", "++-", "+--", "---"],
        }
    }

    /// Corners in UV order: left-down, right-down, right-up, left-up.
    fn uv_order(self) -> [&'static str; 4] {
        match self {
            Face::North => ["---", "+--", "+-+", "--+"],
            Face::East => ["-+-", "---", "--+", "-++"],
            Face::South => ["++-", "-+-", "-++", "+++"],
            Face::West => ["+--", "++-", "+++", "+-+"],
            Face::Up => ["--+", "+-+", "+++", "-++"],
            Face::Down => ["-+-", "++-", "+--", "---"],
        }
    }
}

/// Axis-aligned UV rectangle in engine pixels; negative sizes flip the face.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceRect {
    pub uv: [f64; 2],
    pub uv_size: [f64; 2],
}

impl FaceRect {
    pub fn new(uv: [f64; 2], uv_size: [f64; 2]) -> Self {
        Self { uv, uv_size }
    }

    /// Same rectangle mirrored along U.
    pub fn flipped_u(self) -> Self {
        Self {
            uv: [self.uv[0] + self.uv_size[0], self.uv[1]],
            uv_size: [-self.uv_size[0], self.uv_size[1]],
        }
    }

    pub fn approx_eq(&self, other: &FaceRect) -> bool {
        self.uv
            .iter()
            .chain(&self.uv_size)
            .zip(other.uv.iter().chain(&other.uv_size))
            .all(|(a, b)| is_close(*a, *b))
    }

    /// Corners in UV order (left-down, right-down, right-up, left-up), pixel space.
    fn corners(&self) -> [[f64; 2]; 4] {
        let [u, v] = self.uv;
        let [w, h] = self.uv_size;
        [[u, v + h], [u + w, v + h], [u + w, v], [u, v]]
    }
}

fn corner_bits(name: &str) -> usize {
    name.bytes()
        .enumerate()
        .filter(|(_, sign)| *sign == b'+')
        .fold(0, |bits, (axis, _)| bits | (1 << axis))
}

pub(crate) fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 + 1e-5 * b.abs()
}

// ─── Host UV space ──────────────────────────────────────────────────────────

/// Converts host UV (origin bottom-left, `0..1`) to engine pixels (origin top-left).
pub fn host_uv_to_pixels(uv: [f64; 2], texture_size: [f64; 2]) -> [f64; 2] {
    [uv[0] * texture_size[0], (1.0 - uv[1]) * texture_size[1]]
}

pub fn pixels_to_host_uv(pixels: [f64; 2], texture_size: [f64; 2]) -> [f64; 2] {
    [pixels[0] / texture_size[0], 1.0 - pixels[1] / texture_size[1]]
}

// ─── Solving ────────────────────────────────────────────────────────────────

/// Polygon index and UV-ordered loop positions of every face of a cube mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct CubeFaces {
    polygons: [usize; 6],
    orders: [[usize; 4]; 6],
}

/// Matches the mesh against its bounding box and identifies each face.
///
/// # Errors
/// A human-readable reason when the mesh is not an axis-aligned cuboid in its
/// own local space.
pub fn solve_cube_faces(mesh: &MeshData) -> Result<CubeFaces, String> {
    if mesh.vertices.len() != 8 {
        return Err(format!("expected 8 vertices, found {}", mesh.vertices.len()));
    }
    if mesh.polygons.len() != 6 || mesh.polygons.iter().any(|p| p.len() != 4) {
        return Err("expected 6 quadrilateral faces".to_string());
    }

    let mut min = mesh.vertices[0];
    let mut max = mesh.vertices[0];
    for vertex in &mesh.vertices {
        min = min.inf(vertex);
        max = max.sup(vertex);
    }
    if (0..3).any(|axis| is_close(min[axis], max[axis])) {
        return Err("cube has zero thickness".to_string());
    }

    let mut vertex_corners = Vec::with_capacity(8);
    for vertex in &mesh.vertices {
        let mut bits = 0;
        for axis in 0..3 {
            if is_close(vertex[axis], max[axis]) {
                bits |= 1 << axis;
            } else if !is_close(vertex[axis], min[axis]) {
                return Err("vertex is not in a corner of the bounding box".to_string());
            }
        }
        if vertex_corners.contains(&bits) {
            return Err("two vertices share a corner".to_string());
        }
        vertex_corners.push(bits);
    }

    let mut polygons = [usize::MAX; 6];
    let mut orders = [[0; 4]; 6];
    for (polygon_index, polygon) in mesh.polygons.iter().enumerate() {
        let corners: Vec<usize> = polygon.iter().map(|&v| vertex_corners[v]).collect();
        let face = Face::ALL
            .into_iter()
            .find(|face| {
                let mut pattern: Vec<usize> = face.pattern().iter().map(|c| corner_bits(c)).collect();
                let mut sorted = corners.clone();
                pattern.sort_unstable();
                sorted.sort_unstable();
                pattern == sorted
            })
            .ok_or_else(|| "face does not lie on a side of the bounding box".to_string())?;
        if polygons[face.index()] != usize::MAX {
            return Err(format!("duplicate {} face", face.key()));
        }
        polygons[face.index()] = polygon_index;
        for (slot, corner) in face.uv_order().iter().enumerate() {
            let bits = corner_bits(corner);
            orders[face.index()][slot] = corners
                .iter()
                .position(|&c| c == bits)
                .ok_or_else(|| "face corner mismatch".to_string())?;
        }
    }
    Ok(CubeFaces { polygons, orders })
}

impl CubeFaces {
    /// UV corners of `face` (left-down, right-down, right-up, left-up) in host space.
    pub fn uv_corners(&self, mesh: &MeshData, face: Face) -> Option<[[f64; 2]; 4]> {
        let loops = mesh.uvs.as_ref()?.get(self.polygons[face.index()])?;
        let order = self.orders[face.index()];
        Some([
            *loops.get(order[0])?,
            *loops.get(order[1])?,
            *loops.get(order[2])?,
            *loops.get(order[3])?,
        ])
    }
}

/// Checks that four UV corners form an axis-aligned rectangle.
///
/// Corners are ordered left-down, right-down, right-up, left-up. Flipping on
/// either axis is accepted; rotation is not.
pub fn validate_rectangle_uv(corners: &[[f64; 2]; 4]) -> bool {
    let mut min = corners[0];
    let mut max = corners[0];
    for corner in corners {
        for axis in 0..2 {
            min[axis] = min[axis].min(corner[axis]);
            max[axis] = max[axis].max(corner[axis]);
        }
    }
    let in_corners = corners.iter().all(|corner| {
        (0..2).all(|axis| is_close(corner[axis], min[axis]) || is_close(corner[axis], max[axis]))
    });
    if !in_corners {
        return false;
    }
    let [lb, rb, rt, lt] = corners;
    is_close(lb[0], lt[0]) && is_close(rb[0], rt[0]) && is_close(lt[1], rt[1]) && is_close(lb[1], rb[1])
}

/// Builds an 8-vertex cuboid between `min` and `max`.
///
/// With `uv`, every face gets its rectangle (engine pixels) mapped into host UV
/// space for a texture of the given size.
pub fn cuboid_mesh(
    min: &Vector3<f64>,
    max: &Vector3<f64>,
    uv: Option<(&[FaceRect; 6], [f64; 2])>,
) -> MeshData {
    let vertices = (0..8)
        .map(|bits| {
            Vector3::new(
                if bits & 1 != 0 { max.x } else { min.x },
                if bits & 2 != 0 { max.y } else { min.y },
                if bits & 4 != 0 { max.z } else { min.z },
            )
        })
        .collect();
    let polygons: Vec<Vec<usize>> = Face::ALL
        .iter()
        .map(|face| face.pattern().iter().map(|c| corner_bits(c)).collect())
        .collect();
    let uvs = uv.map(|(rects, texture_size)| {
        Face::ALL
            .iter()
            .zip(&polygons)
            .map(|(face, polygon)| {
                let corners = rects[face.index()].corners();
                let order = face.uv_order().map(corner_bits);
                polygon
                    .iter()
                    .map(|corner| {
                        let slot = order.iter().position(|c| c == corner).unwrap_or(0);
                        pixels_to_host_uv(corners[slot], texture_size)
                    })
                    .collect()
            })
            .collect()
    });
    MeshData {
        vertices,
        polygons,
        uvs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_rects() -> [FaceRect; 6] {
        [
            FaceRect::new([4.0, 4.0], [4.0, 4.0]),
            FaceRect::new([0.0, 4.0], [4.0, 4.0]),
            FaceRect::new([12.0, 4.0], [4.0, 4.0]),
            FaceRect::new([8.0, 4.0], [4.0, 4.0]),
            FaceRect::new([4.0, 0.0], [4.0, 4.0]),
            FaceRect::new([8.0, 0.0], [4.0, 4.0]),
        ]
    }

    #[test]
    fn given_generated_cuboid_when_solving_faces_then_uv_rectangles_are_recovered() {
        let rects = unit_rects();
        let mesh = cuboid_mesh(
            &Vector3::repeat(-1.0),
            &Vector3::repeat(1.0),
            Some((&rects, [16.0, 16.0])),
        );

        let faces = solve_cube_faces(&mesh).expect("mesh is a cuboid");

        for face in Face::ALL {
            let corners = faces.uv_corners(&mesh, face).expect("uv present");
            assert!(validate_rectangle_uv(&corners), "{} invalid", face.key());
            let left_up = host_uv_to_pixels(corners[3], [16.0, 16.0]);
            let right_down = host_uv_to_pixels(corners[1], [16.0, 16.0]);
            let rect = FaceRect::new(left_up, [right_down[0] - left_up[0], right_down[1] - left_up[1]]);
            assert!(rect.approx_eq(&rects[face.index()]), "{} mismatch", face.key());
        }
    }

    #[test]
    fn given_shuffled_vertices_when_solving_then_faces_are_still_found() {
        let mut mesh = cuboid_mesh(&Vector3::zeros(), &Vector3::new(1.0, 2.0, 3.0), None);
        mesh.vertices.swap(0, 7);
        for polygon in &mut mesh.polygons {
            for vertex in polygon.iter_mut() {
                *vertex = match *vertex {
                    0 => 7,
                    7 => 0,
                    other => other,
                };
            }
        }

        assert!(solve_cube_faces(&mesh).is_ok());
    }

    #[test]
    fn given_deformed_mesh_when_solving_then_error_is_returned() {
        let mut mesh = cuboid_mesh(&Vector3::zeros(), &Vector3::repeat(1.0), None);
        mesh.vertices[3].x = 0.5;

        assert!(solve_cube_faces(&mesh).is_err());
    }

    #[test]
    fn given_flipped_and_rotated_uvs_when_validating_then_only_flip_is_accepted() {
        let flipped = [[1.0, 0.0], [0.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let rotated = [[1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]];
        let skewed = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.5, 1.0]];

        assert!(validate_rectangle_uv(&flipped));
        assert!(!validate_rectangle_uv(&rotated));
        assert!(!validate_rectangle_uv(&skewed));
    }

    #[test]
    fn given_rect_when_flipping_u_then_origin_moves_to_other_edge() {
        let flipped = FaceRect::new([2.0, 3.0], [4.0, 5.0]).flipped_u();

        assert_eq!(flipped, FaceRect::new([6.0, 3.0], [-4.0, 5.0]));
    }
}
