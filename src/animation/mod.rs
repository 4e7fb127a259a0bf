//! Animation export: samples bone poses at keyframe times and writes them as
//! deltas from the pose at the first frame.

pub mod optimize;

use log::{debug, info, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::ConversionError;
use crate::math::{
    MINECRAFT_SCALE_FACTOR, is_finite, local_matrix, normalized, pick_closest_rotation, round_to, scale_of,
    swap_yz, translation_of, vect_json,
};
use crate::scene::{HostScene, Interpolation, Keyframe, ObjectId, SceneGraph};
use optimize::{RemovedKeyframes, optimize_animation_json};

pub const ANIMATION_FORMAT_VERSION: &str = "1.8.0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationLoop {
    #[default]
    Once,
    Loop,
    HoldOnLastFrame,
}

/// Settings of the animation exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationExportOptions {
    /// Name without the `animation.` prefix.
    pub name: String,
    pub fps: f64,
    /// Reference frame; its pose is the rest pose of every bone.
    pub frame_start: f64,
    pub frame_end: f64,
    #[serde(rename = "loop")]
    pub loop_mode: AnimationLoop,
    /// Molang expression, empty to omit.
    pub anim_time_update: String,
    pub skip_rest_poses: bool,
    /// Error margin of the lossy keyframe reduction, `None` to disable it.
    pub optimize: Option<f64>,
}

impl Default for AnimationExportOptions {
    fn default() -> Self {
        Self {
            name: "animation".to_string(),
            fps: 24.0,
            frame_start: 0.0,
            frame_end: 24.0,
            loop_mode: AnimationLoop::Once,
            anim_time_update: String::new(),
            skip_rest_poses: true,
            optimize: None,
        }
    }
}

/// Result of an animation export.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationExport {
    /// Whole animation file, including animations kept from the extended file.
    pub json: Value,
    pub warnings: Vec<String>,
    /// Keyframes removed by the lossy reduction when it ran.
    pub removed: Option<RemovedKeyframes>,
}

/// Location, rotation and scale of a bone in engine space.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Pose {
    location: Vector3<f64>,
    rotation: Vector3<f64>,
    scale: Vector3<f64>,
}

impl Pose {
    fn rest() -> Self {
        Self {
            location: Vector3::zeros(),
            rotation: Vector3::zeros(),
            scale: Vector3::repeat(1.0),
        }
    }
}

/// Samples the pose of a bone relative to its custom parent.
///
/// Location comes from the scale-free local matrix, rotation from the engine
/// rotation and scale is the world scale divided by the parent's.
fn sample_pose(host: &impl HostScene, graph: &SceneGraph, id: &ObjectId) -> Result<Pose, String> {
    let world = host.world_transform(id);
    let parent = graph.parent_matrix(host, id);
    if !is_finite(&world) || !is_finite(&parent) {
        return Err("transform is not finite".to_string());
    }
    let local = local_matrix(&normalized(&parent), &normalized(&world))
        .ok_or_else(|| "parent transform is not invertible".to_string())?;
    let scale = swap_yz(&scale_of(&world).component_div(&scale_of(&parent)));
    let rotation = graph.mc_rotation(host, id);
    if !scale.iter().chain(rotation.iter()).all(|c| c.is_finite()) {
        return Err("scale or rotation is not finite".to_string());
    }
    Ok(Pose {
        location: swap_yz(&translation_of(&local)) * MINECRAFT_SCALE_FACTOR,
        rotation,
        scale,
    })
}

/// Keyframe value forms by interpolation.
#[derive(Debug, Clone, Copy, PartialEq)]
enum KeyShape {
    Linear,
    /// The segment leading to the key holds the previous value.
    Stepped,
    Smooth,
}

/// One sampled channel value.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ChannelKey {
    frame: f64,
    value: [f64; 3],
    shape: KeyShape,
}

#[derive(Debug, Default)]
struct BoneTrack {
    position: Vec<ChannelKey>,
    rotation: Vec<ChannelKey>,
    scale: Vec<ChannelKey>,
}

fn same_frame(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

/// Interpolation keyed at `frame`; step wins over smooth when curves disagree.
fn interpolation_at(keys: &[Keyframe], frame: f64) -> Interpolation {
    let mut result = Interpolation::Linear;
    for key in keys.iter().filter(|key| same_frame(key.frame, frame)) {
        match key.interpolation {
            Interpolation::Step => return Interpolation::Step,
            Interpolation::Smooth => result = Interpolation::Smooth,
            Interpolation::Linear => {}
        }
    }
    result
}

/// Keyframe times of every node after `start` up to `end`, ascending.
fn collect_keyframe_times(host: &impl HostScene, graph: &SceneGraph, start: f64, end: f64) -> Vec<f64> {
    let mut times: Vec<f64> = graph
        .iter()
        .flat_map(|node| host.keyframes(&node.id))
        .map(|key| key.frame)
        .filter(|&frame| frame > start && !same_frame(frame, start) && frame <= end)
        .collect();
    times.sort_by(f64::total_cmp);
    times.dedup_by(|a, b| same_frame(*a, *b));
    times
}

/// Time key of a frame: seconds from the start rounded to four decimals,
/// always with a fractional part.
fn time_key(frame: f64, start: f64, fps: f64) -> String {
    let seconds = round_to((frame - start) / fps, 4);
    if seconds.fract() == 0.0 {
        format!("{seconds:.1}")
    } else {
        format!("{seconds}")
    }
}

/// Drops samples that repeat their predecessor and successor.
///
/// The value before the first sample is the rest value; the last sample has
/// no successor and is dropped when it repeats its predecessor.
fn skip_rest_poses(keys: &[ChannelKey], rest: [f64; 3]) -> Vec<ChannelKey> {
    keys.iter()
        .enumerate()
        .filter(|(i, key)| {
            let previous = if *i == 0 { rest } else { keys[i - 1].value };
            let repeats_next = keys.get(i + 1).is_none_or(|next| next.value == key.value);
            !(key.value == previous && repeats_next)
        })
        .map(|(_, key)| *key)
        .collect()
}

fn channel_json(keys: &[ChannelKey], all: &[ChannelKey], rest: [f64; 3], start: f64, fps: f64) -> Map<String, Value> {
    let mut channel = Map::new();
    for key in keys {
        let previous = all
            .iter()
            .rev()
            .find(|other| other.frame < key.frame && !same_frame(other.frame, key.frame))
            .map_or(rest, |other| other.value);
        let value = match key.shape {
            KeyShape::Linear => json!(key.value),
            KeyShape::Stepped => json!({"pre": previous, "post": key.value}),
            KeyShape::Smooth => json!({"post": key.value, "lerp_mode": "catmullrom"}),
        };
        channel.insert(time_key(key.frame, start, fps), value);
    }
    channel
}

/// Exports the animation of every bone in `graph`.
///
/// The host is moved to each keyframe time after the start frame, and left at
/// the start frame afterwards. Poses that cannot be sampled are written as
/// rest values and reported in `warnings`.
///
/// # Arguments
/// * `extend` - Existing animation file; the animation is added to it, or
///   replaces one of the same name. Ignored unless it has an `animations`
///   object.
///
/// # Errors
/// [`ConversionError::InvalidFrameRate`] when `fps` is not positive.
pub fn export_animation<H: HostScene>(
    host: &mut H,
    graph: &SceneGraph,
    options: &AnimationExportOptions,
    extend: Option<Value>,
) -> Result<AnimationExport, ConversionError> {
    if options.fps.is_nan() || options.fps <= 0.0 {
        return Err(ConversionError::InvalidFrameRate { fps: options.fps });
    }
    let start = options.frame_start;
    let mut warnings = Vec::new();
    let bones: Vec<&ObjectId> = graph
        .iter()
        .filter(|node| node.kind.is_bone())
        .map(|node| &node.id)
        .collect();
    let times = collect_keyframe_times(&*host, graph, start, options.frame_end);
    debug!("sampling {} bones at {} keyframe times", bones.len(), times.len());

    host.set_frame(start);
    let rests: Vec<Pose> = bones
        .iter()
        .map(|id| {
            sample_pose(&*host, graph, id).unwrap_or_else(|reason| {
                warnings.push(format!("{}: rest pose at frame {start}: {reason}", id.export_name()));
                Pose::rest()
            })
        })
        .collect();
    let keyframes: Vec<Vec<Keyframe>> = bones.iter().map(|id| host.keyframes(id)).collect();

    let mut tracks: Vec<BoneTrack> = bones.iter().map(|_| BoneTrack::default()).collect();
    let mut previous_rotations = vec![Vector3::zeros(); bones.len()];
    let mut previous_frame = start;
    for &frame in &times {
        host.set_frame(frame);
        for (i, id) in bones.iter().enumerate() {
            let delta = match sample_pose(&*host, graph, id) {
                Ok(pose) => {
                    let rest = &rests[i];
                    let rotation = pick_closest_rotation(
                        &(pose.rotation - rest.rotation),
                        &previous_rotations[i],
                        Some(&rest.rotation),
                    );
                    let scale = pose
                        .scale
                        .zip_map(&rest.scale, |current, rest| if rest == 0.0 { current } else { current / rest });
                    Pose {
                        location: pose.location - rest.location,
                        rotation,
                        scale,
                    }
                }
                Err(reason) => {
                    warnings.push(format!("{}: pose at frame {frame}: {reason}", id.export_name()));
                    Pose::rest()
                }
            };
            previous_rotations[i] = delta.rotation;

            let shape = if interpolation_at(&keyframes[i], previous_frame) == Interpolation::Step {
                KeyShape::Stepped
            } else if interpolation_at(&keyframes[i], frame) == Interpolation::Smooth {
                KeyShape::Smooth
            } else {
                KeyShape::Linear
            };
            let key = |value: &Vector3<f64>| ChannelKey {
                frame,
                value: vect_json(value),
                shape,
            };
            tracks[i].position.push(key(&delta.location));
            tracks[i].rotation.push(key(&delta.rotation));
            tracks[i].scale.push(key(&delta.scale));
        }
        previous_frame = frame;
    }
    host.set_frame(start);

    let rest = Pose::rest();
    let mut bones_json = Map::new();
    for (id, track) in bones.iter().zip(&tracks) {
        let mut bone = Map::new();
        for (name, keys, rest_value) in [
            ("position", &track.position, vect_json(&rest.location)),
            ("rotation", &track.rotation, vect_json(&rest.rotation)),
            ("scale", &track.scale, vect_json(&rest.scale)),
        ] {
            let kept = if options.skip_rest_poses {
                skip_rest_poses(keys, rest_value)
            } else {
                keys.clone()
            };
            if !kept.is_empty() {
                let channel = channel_json(&kept, keys, rest_value, start, options.fps);
                bone.insert(name.to_string(), Value::Object(channel));
            }
        }
        if !bone.is_empty() {
            bones_json.insert(id.export_name().to_string(), Value::Object(bone));
        }
    }

    let mut animation = Map::new();
    animation.insert(
        "animation_length".to_string(),
        json!(round_to((options.frame_end - start) / options.fps, 4)),
    );
    match options.loop_mode {
        AnimationLoop::Once => {}
        AnimationLoop::Loop => {
            animation.insert("loop".to_string(), json!(true));
        }
        AnimationLoop::HoldOnLastFrame => {
            animation.insert("loop".to_string(), json!("hold_on_last_frame"));
        }
    }
    if !options.anim_time_update.is_empty() {
        animation.insert("anim_time_update".to_string(), json!(options.anim_time_update));
    }
    animation.insert("bones".to_string(), Value::Object(bones_json));

    let mut file = match extend {
        Some(existing) if existing.get("animations").is_some_and(Value::is_object) => existing,
        Some(_) => {
            warn!("file to extend has no animations object, writing a new file");
            json!({"format_version": ANIMATION_FORMAT_VERSION, "animations": {}})
        }
        None => json!({"format_version": ANIMATION_FORMAT_VERSION, "animations": {}}),
    };
    if let Some(animations) = file.get_mut("animations").and_then(Value::as_object_mut) {
        animations.insert(format!("animation.{}", options.name), Value::Object(animation));
    }

    let removed = options
        .optimize
        .map(|margin| optimize_animation_json(&mut file, margin, Some(&options.name)));
    for warning in &warnings {
        warn!("{warning}");
    }
    info!(
        "exported animation.{} with {} bones over {} keyframe times",
        options.name,
        tracks.len(),
        times.len()
    );
    Ok(AnimationExport {
        json: file,
        warnings,
        removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::build_scene_graph;
    use crate::scene::memory::{MemoryObject, MemoryScene};
    use nalgebra::{Matrix4, Rotation3};
    use pretty_assertions::assert_eq;

    fn moving_root(interpolation: Interpolation) -> (MemoryScene, ObjectId) {
        let mut scene = MemoryScene::default();
        let id = scene.add(MemoryObject::empty("root", Matrix4::identity()));
        scene.insert_keyframe(&id, 0.0, Matrix4::identity(), interpolation);
        scene.insert_keyframe(
            &id,
            10.0,
            Matrix4::new_translation(&Vector3::new(1.0, 0.0, 0.0)),
            interpolation,
        );
        (scene, id)
    }

    fn options() -> AnimationExportOptions {
        AnimationExportOptions {
            name: "move".to_string(),
            fps: 10.0,
            frame_end: 10.0,
            ..AnimationExportOptions::default()
        }
    }

    fn export(scene: &mut MemoryScene, options: &AnimationExportOptions) -> AnimationExport {
        let graph = build_scene_graph(&*scene).expect("valid scene");
        export_animation(scene, &graph, options, None).expect("positive frame rate")
    }

    #[test]
    fn given_unchanged_pose_when_exporting_then_no_keyframes_are_written() {
        let mut scene = MemoryScene::default();
        let id = scene.add(MemoryObject::empty("root", Matrix4::identity()));
        scene.insert_keyframe(&id, 0.0, Matrix4::identity(), Interpolation::Linear);
        scene.insert_keyframe(&id, 10.0, Matrix4::identity(), Interpolation::Linear);

        let result = export(&mut scene, &options());

        assert_eq!(result.json["animations"]["animation.move"]["bones"], json!({}));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn given_moving_bone_when_exporting_then_position_delta_is_written_in_seconds() {
        let (mut scene, _) = moving_root(Interpolation::Linear);

        let result = export(&mut scene, &options());

        assert_eq!(
            result.json,
            json!({
                "format_version": "1.8.0",
                "animations": {
                    "animation.move": {
                        "animation_length": 1.0,
                        "bones": {"root": {"position": {"1.0": [16.0, 0.0, 0.0]}}}
                    }
                }
            })
        );
        assert_eq!(scene.frame(), 0.0);
    }

    #[test]
    fn given_skip_rest_poses_disabled_when_exporting_then_unchanged_channels_are_written() {
        let (mut scene, _) = moving_root(Interpolation::Linear);
        let options = AnimationExportOptions {
            skip_rest_poses: false,
            ..options()
        };

        let result = export(&mut scene, &options);

        let bone = &result.json["animations"]["animation.move"]["bones"]["root"];
        assert_eq!(bone["rotation"], json!({"1.0": [0.0, 0.0, 0.0]}));
        assert_eq!(bone["scale"], json!({"1.0": [1.0, 1.0, 1.0]}));
    }

    #[test]
    fn given_stepped_key_when_exporting_then_pre_and_post_values_are_written() {
        let (mut scene, _) = moving_root(Interpolation::Step);

        let result = export(&mut scene, &options());

        assert_eq!(
            result.json["animations"]["animation.move"]["bones"]["root"]["position"],
            json!({"1.0": {"pre": [0.0, 0.0, 0.0], "post": [16.0, 0.0, 0.0]}})
        );
    }

    #[test]
    fn given_smooth_key_when_exporting_then_catmullrom_is_requested() {
        let (mut scene, _) = moving_root(Interpolation::Smooth);

        let result = export(&mut scene, &options());

        assert_eq!(
            result.json["animations"]["animation.move"]["bones"]["root"]["position"],
            json!({"1.0": {"post": [16.0, 0.0, 0.0], "lerp_mode": "catmullrom"}})
        );
    }

    #[test]
    fn given_rotation_past_half_turn_when_exporting_then_rotation_stays_continuous() {
        let mut scene = MemoryScene::default();
        let id = scene.add(MemoryObject::empty("spinner", Matrix4::identity()));
        for (frame, degrees) in [(0.0, 0.0), (10.0, 170.0), (20.0, 190.0_f64)] {
            let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), degrees.to_radians());
            scene.insert_keyframe(&id, frame, rotation.to_homogeneous(), Interpolation::Linear);
        }
        let options = AnimationExportOptions {
            frame_end: 20.0,
            ..options()
        };

        let result = export(&mut scene, &options);

        let rotation = &result.json["animations"]["animation.move"]["bones"]["spinner"]["rotation"];
        let first: Vec<f64> = (0..3).map(|i| rotation["1.0"][i].as_f64().expect("number")).collect();
        let second: Vec<f64> = (0..3).map(|i| rotation["2.0"][i].as_f64().expect("number")).collect();
        let axis = (0..3)
            .max_by(|&a, &b| first[a].abs().total_cmp(&first[b].abs()))
            .expect("three axes");
        assert!((first[axis].abs() - 170.0).abs() < 1e-3, "{first:?}");
        assert!((second[axis].abs() - 190.0).abs() < 1e-3, "{second:?}");
        assert!((second[axis] - first[axis]).abs() < 20.0 + 1e-3);
    }

    #[test]
    fn given_existing_file_when_extending_then_other_animations_are_kept() {
        let (mut scene, _) = moving_root(Interpolation::Linear);
        let graph = build_scene_graph(&scene).expect("valid scene");
        let existing = json!({
            "format_version": "1.8.0",
            "animations": {"animation.idle": {"animation_length": 2.0, "bones": {}}}
        });
        let options = AnimationExportOptions {
            loop_mode: AnimationLoop::HoldOnLastFrame,
            anim_time_update: "query.anim_time + query.delta_time".to_string(),
            ..options()
        };

        let result = export_animation(&mut scene, &graph, &options, Some(existing)).expect("positive frame rate");

        let animations = &result.json["animations"];
        assert_eq!(animations["animation.idle"]["animation_length"], json!(2.0));
        assert_eq!(animations["animation.move"]["loop"], json!("hold_on_last_frame"));
        assert_eq!(
            animations["animation.move"]["anim_time_update"],
            json!("query.anim_time + query.delta_time")
        );
    }

    #[test]
    fn given_straight_motion_when_optimizing_then_middle_keyframe_is_removed() {
        let mut scene = MemoryScene::default();
        let id = scene.add(MemoryObject::empty("root", Matrix4::identity()));
        for frame in [0.0, 5.0, 10.0, 15.0] {
            let offset = Vector3::new(frame / 10.0, 0.0, 0.0);
            scene.insert_keyframe(&id, frame, Matrix4::new_translation(&offset), Interpolation::Linear);
        }
        let options = AnimationExportOptions {
            frame_end: 15.0,
            optimize: Some(0.01),
            ..options()
        };

        let result = export(&mut scene, &options);

        assert_eq!(result.removed.map(|removed| removed.position), Some(1));
        assert_eq!(
            result.json["animations"]["animation.move"]["bones"]["root"]["position"],
            json!({"0.5": [8.0, 0.0, 0.0], "1.5": [24.0, 0.0, 0.0]})
        );
    }

    #[test]
    fn given_non_finite_pose_when_exporting_then_rest_delta_and_warning_are_returned() {
        let mut scene = MemoryScene::default();
        let id = scene.add(MemoryObject::empty("broken", Matrix4::identity()));
        scene.insert_keyframe(&id, 0.0, Matrix4::identity(), Interpolation::Linear);
        scene.insert_keyframe(&id, 10.0, Matrix4::from_element(f64::NAN), Interpolation::Linear);
        let options = AnimationExportOptions {
            skip_rest_poses: false,
            ..options()
        };

        let result = export(&mut scene, &options);

        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("broken"));
        assert_eq!(
            result.json["animations"]["animation.move"]["bones"]["broken"]["position"],
            json!({"1.0": [0.0, 0.0, 0.0]})
        );
    }

    #[test]
    fn given_zero_fps_when_exporting_then_error_is_returned() {
        let (mut scene, _) = moving_root(Interpolation::Linear);
        let graph = build_scene_graph(&scene).expect("valid scene");
        let options = AnimationExportOptions {
            fps: 0.0,
            ..options()
        };

        let error = export_animation(&mut scene, &graph, &options, None).expect_err("invalid frame rate");

        assert_eq!(error, ConversionError::InvalidFrameRate { fps: 0.0 });
    }

    #[test]
    fn given_frames_when_formatting_time_keys_then_python_style_decimals_are_used() {
        assert_eq!(time_key(24.0, 0.0, 24.0), "1.0");
        assert_eq!(time_key(10.0, 0.0, 24.0), "0.4167");
        assert_eq!(time_key(12.0, 0.0, 24.0), "0.5");
    }
}
