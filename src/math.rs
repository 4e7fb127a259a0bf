use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

/// Number of engine pixels in one host unit.
pub const MINECRAFT_SCALE_FACTOR: f64 = 16.0;

// ─── Axis conventions ───────────────────────────────────────────────────────

/// Reorders a host-space vector `(x, y, z)` into engine order `(x, z, y)`.
///
/// The swap is its own inverse, so the same function converts back.
pub fn swap_yz(v: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.x, v.z, v.y)
}

/// Rounds a value to `digits` decimal places and normalizes `-0.0`.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    let rounded = (value * factor).round() / factor;
    if rounded == 0.0 { 0.0 } else { rounded }
}

/// Converts a vector to the 3-decimal form written into engine JSON files.
pub fn vect_json(v: &Vector3<f64>) -> [f64; 3] {
    [round_to(v.x, 3), round_to(v.y, 3), round_to(v.z, 3)]
}

// ─── Matrix helpers ─────────────────────────────────────────────────────────

/// Returns `child_world` expressed in the local space of `parent_world`.
///
/// # Arguments
/// * `parent_world` - World matrix of the parent.
/// * `child_world` - World matrix of the child.
///
/// # Returns
/// `inverse(parent_world) * child_world`, or `None` when the parent matrix is
/// singular.
pub fn local_matrix(
    parent_world: &Matrix4<f64>,
    child_world: &Matrix4<f64>,
) -> Option<Matrix4<f64>> {
    parent_world.try_inverse().map(|inverse| inverse * child_world)
}

/// Per-axis scale of a transform (lengths of the basis columns).
pub fn scale_of(matrix: &Matrix4<f64>) -> Vector3<f64> {
    let basis = matrix.fixed_view::<3, 3>(0, 0);
    Vector3::new(
        basis.column(0).norm(),
        basis.column(1).norm(),
        basis.column(2).norm(),
    )
}

pub fn translation_of(matrix: &Matrix4<f64>) -> Vector3<f64> {
    Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)])
}

/// Returns a copy of `matrix` with unit-length basis columns; translation is kept.
pub fn normalized(matrix: &Matrix4<f64>) -> Matrix4<f64> {
    let mut result = *matrix;
    let scale = scale_of(matrix);
    for axis in 0..3 {
        if scale[axis] > f64::EPSILON {
            for row in 0..3 {
                result[(row, axis)] /= scale[axis];
            }
        }
    }
    result
}

/// Rotation part of a transform with scale removed.
pub fn rotation_of(matrix: &Matrix4<f64>) -> Rotation3<f64> {
    let unit = normalized(matrix);
    let basis: Matrix3<f64> = unit.fixed_view::<3, 3>(0, 0).into_owned();
    Rotation3::from_matrix(&basis)
}

/// Builds a world matrix from translation, rotation and per-axis scale.
pub fn compose(
    translation: &Vector3<f64>,
    rotation: &Rotation3<f64>,
    scale: &Vector3<f64>,
) -> Matrix4<f64> {
    let mut matrix = rotation.to_homogeneous() * Matrix4::new_nonuniform_scaling(scale);
    matrix[(0, 3)] = translation.x;
    matrix[(1, 3)] = translation.y;
    matrix[(2, 3)] = translation.z;
    matrix
}

pub fn is_finite(matrix: &Matrix4<f64>) -> bool {
    matrix.iter().all(|value| value.is_finite())
}

// ─── Euler conversions ──────────────────────────────────────────────────────

/// Builds a rotation from host Euler angles (radians) applied X, then Z, then Y.
pub fn rotation_from_euler_xzy(angles: &Vector3<f64>) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::y_axis(), angles.y)
        * Rotation3::from_axis_angle(&Vector3::z_axis(), angles.z)
        * Rotation3::from_axis_angle(&Vector3::x_axis(), angles.x)
}

/// Extracts host Euler angles (radians) for the X, Z, Y application order.
///
/// The Z angle is kept in `[-90°, 90°]`; the other two in `(-180°, 180°]`.
pub fn euler_xzy_from_rotation(rotation: &Rotation3<f64>) -> Vector3<f64> {
    let m = rotation.matrix();
    let sin_z = m[(1, 0)].clamp(-1.0, 1.0);
    let z = sin_z.asin();
    if sin_z.abs() < 1.0 - 1e-9 {
        let x = (-m[(1, 2)]).atan2(m[(1, 1)]);
        let y = (-m[(2, 0)]).atan2(m[(0, 0)]);
        Vector3::new(x, y, z)
    } else {
        // Gimbal lock: X and Y share an axis, fold everything into Y.
        let y = m[(0, 2)].atan2(m[(2, 2)]);
        Vector3::new(0.0, y, z)
    }
}

/// Engine rotation in degrees of `child_world`, optionally relative to a parent.
///
/// Rotations go through unit quaternions so the relative rotation is computed
/// without touching Euler angles; only the final value is converted back. The
/// result for matrices with shear or non-uniform scale is deterministic but has
/// no engine meaning.
pub fn mc_rotation(child_world: &Matrix4<f64>, parent_world: Option<&Matrix4<f64>>) -> Vector3<f64> {
    let child = UnitQuaternion::from_rotation_matrix(&rotation_of(child_world));
    let relative = match parent_world {
        Some(parent) => {
            let parent = UnitQuaternion::from_rotation_matrix(&rotation_of(parent));
            parent.inverse() * child
        }
        None => child,
    };
    let euler = euler_xzy_from_rotation(&relative.to_rotation_matrix());
    Vector3::new(
        euler.x.to_degrees(),
        -euler.z.to_degrees(),
        euler.y.to_degrees(),
    )
}

/// Inverse of [`mc_rotation`]: host rotation for an engine rotation in degrees.
pub fn rotation_from_mc(mc_degrees: &Vector3<f64>) -> Rotation3<f64> {
    rotation_from_euler_xzy(&Vector3::new(
        mc_degrees.x.to_radians(),
        mc_degrees.z.to_radians(),
        -mc_degrees.y.to_radians(),
    ))
}

// ─── Rotation continuity ────────────────────────────────────────────────────

/// Picks the representation of `candidate` closest to `reference`.
///
/// Two Euler triples describe every orientation in the engine's axis order;
/// each axis may also be shifted by whole turns. Both triples are stepped in
/// ±360° increments toward `reference` and the closer one is returned.
///
/// `original` is the object's rotation before the animation starts. When the
/// candidate is a delta against that rotation, the twin triple has to absorb
/// it on the Y axis.
///
/// Changes larger than 180° between consecutive samples cannot be told apart
/// from the shorter rotation in the opposite direction and come out as the
/// shorter one.
///
/// # Arguments
/// * `candidate` - Rotation in degrees to re-express.
/// * `reference` - Rotation in degrees to stay close to (the previous key).
/// * `original` - Rest rotation in degrees, zero when omitted.
///
/// # Returns
/// An equivalent rotation to `candidate` with minimal distance to `reference`.
pub fn pick_closest_rotation(
    candidate: &Vector3<f64>,
    reference: &Vector3<f64>,
    original: Option<&Vector3<f64>>,
) -> Vector3<f64> {
    let original_y = original.map_or(0.0, |original| original.y);
    let (distance, choice) = step_toward(*candidate, reference);

    let twin = Vector3::new(
        candidate.x + 180.0,
        -(candidate.y + 180.0 + original_y * 2.0),
        candidate.z + 180.0,
    );
    let (twin_distance, twin_choice) = step_toward(twin, reference);

    if twin_distance < distance {
        twin_choice
    } else {
        choice
    }
}

fn step_toward(mut choice: Vector3<f64>, reference: &Vector3<f64>) -> (f64, Vector3<f64>) {
    let mut distance = (choice - reference).norm();
    for axis in 0..3 {
        let mut turn = Vector3::zeros();
        turn[axis] = 360.0;
        while choice[axis] < reference[axis] {
            let next = choice + turn;
            let next_distance = (next - reference).norm();
            if next_distance > distance {
                break;
            }
            distance = next_distance;
            choice = next;
        }
        while choice[axis] > reference[axis] {
            let next = choice - turn;
            let next_distance = (next - reference).norm();
            if next_distance > distance {
                break;
            }
            distance = next_distance;
            choice = next;
        }
    }
    (distance, choice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_vec_close(actual: &Vector3<f64>, expected: &Vector3<f64>, tolerance: f64) {
        assert!(
            (actual - expected).norm() < tolerance,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn given_negative_zero_when_rounding_for_json_then_sign_is_dropped() {
        let rounded = vect_json(&Vector3::new(-0.0001, 1.23456, -2.5));

        assert_eq!(rounded, [0.0, 1.235, -2.5]);
        assert!(rounded[0].is_sign_positive());
    }

    #[test]
    fn given_parent_and_child_when_computing_local_matrix_then_parent_is_factored_out() {
        let parent = compose(
            &Vector3::new(1.0, 2.0, 3.0),
            &Rotation3::from_axis_angle(&Vector3::z_axis(), 0.5),
            &Vector3::new(1.0, 1.0, 1.0),
        );
        let local = Matrix4::new_translation(&Vector3::new(0.0, 4.0, 0.0));
        let child = parent * local;

        let recovered = local_matrix(&parent, &child).expect("invertible parent");

        assert!((recovered - local).norm() < 1e-9);
    }

    #[test]
    fn given_engine_rotation_when_round_tripping_through_matrix_then_angles_match() {
        let mc = Vector3::new(30.0, -45.0, 60.0);
        let world = compose(&Vector3::zeros(), &rotation_from_mc(&mc), &Vector3::repeat(1.0));

        assert_vec_close(&mc_rotation(&world, None), &mc, 1e-9);
    }

    #[test]
    fn given_scaled_matrix_when_extracting_rotation_then_scale_is_ignored() {
        let mc = Vector3::new(0.0, 0.0, 90.0);
        let world = compose(
            &Vector3::new(3.0, 0.0, 0.0),
            &rotation_from_mc(&mc),
            &Vector3::new(2.0, 2.0, 2.0),
        );

        assert_vec_close(&mc_rotation(&world, None), &mc, 1e-9);
        assert_vec_close(&scale_of(&world), &Vector3::new(2.0, 2.0, 2.0), 1e-9);
    }

    #[test]
    fn given_parent_rotation_when_extracting_relative_rotation_then_parent_is_removed() {
        let parent = compose(
            &Vector3::zeros(),
            &rotation_from_mc(&Vector3::new(0.0, 40.0, 0.0)),
            &Vector3::repeat(1.0),
        );
        let local = rotation_from_mc(&Vector3::new(20.0, 0.0, 0.0)).to_homogeneous();

        let relative = mc_rotation(&(parent * local), Some(&parent));

        assert_vec_close(&relative, &Vector3::new(20.0, 0.0, 0.0), 1e-9);
    }

    #[test]
    fn given_full_turn_offset_when_picking_closest_then_offset_is_removed() {
        let picked = pick_closest_rotation(
            &Vector3::new(-170.0, 0.0, 0.0),
            &Vector3::new(175.0, 0.0, 0.0),
            None,
        );

        assert_vec_close(&picked, &Vector3::new(190.0, 0.0, 0.0), 1e-9);
    }

    #[test]
    fn given_twin_euler_solution_when_picking_closest_then_twin_is_chosen() {
        // (180, -80, 180) is the same orientation as (0, -100, 0).
        let picked = pick_closest_rotation(
            &Vector3::new(180.0, -80.0, 180.0),
            &Vector3::new(0.0, -95.0, 0.0),
            None,
        );

        assert_vec_close(&picked, &Vector3::new(0.0, -100.0, 0.0), 1e-9);
    }

    #[test]
    fn given_smooth_rotation_sequence_when_picking_sequentially_then_sequence_is_reproduced() {
        let mut previous = Vector3::zeros();
        for step in 1..=28 {
            let step = f64::from(step);
            let truth = Vector3::new(13.0 * step, 21.0 * step, -7.0 * step);
            let world = compose(&Vector3::zeros(), &rotation_from_mc(&truth), &Vector3::repeat(1.0));

            let picked = pick_closest_rotation(&mc_rotation(&world, None), &previous, None);

            assert_vec_close(&picked, &truth, 1e-6);
            previous = picked;
        }
    }

    #[test]
    fn given_jump_over_half_turn_when_picking_then_shorter_rotation_is_returned() {
        let truth = Vector3::new(0.0, 0.0, 200.0);
        let world = compose(&Vector3::zeros(), &rotation_from_mc(&truth), &Vector3::repeat(1.0));

        let picked = pick_closest_rotation(&mc_rotation(&world, None), &Vector3::zeros(), None);

        assert_vec_close(&picked, &Vector3::new(0.0, 0.0, -160.0), 1e-6);
    }
}
