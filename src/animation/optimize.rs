//! Lossy keyframe reduction for engine animation files.

use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};

/// Number of keyframes removed from each channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemovedKeyframes {
    pub rotation: usize,
    pub position: usize,
    pub scale: usize,
}

impl RemovedKeyframes {
    pub fn total(&self) -> usize {
        self.rotation + self.position + self.scale
    }

    fn channel_mut(&mut self, channel: &str) -> Option<&mut usize> {
        match channel {
            "rotation" => Some(&mut self.rotation),
            "position" => Some(&mut self.position),
            "scale" => Some(&mut self.scale),
            _ => None,
        }
    }
}

const CHANNELS: [&str; 3] = ["rotation", "position", "scale"];

fn as_vector(value: &Value) -> Option<[f64; 3]> {
    match value.as_array()?.as_slice() {
        [x, y, z] => Some([x.as_f64()?, y.as_f64()?, z.as_f64()?]),
        _ => None,
    }
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Whether the middle keyframe lies on the straight line between its
/// neighbours.
///
/// The distance between the keyframe and the value interpolated at its time
/// is divided by the distance between the neighbours (at least `1e-5`) and
/// compared against `error_margin`. Keyframes that are not plain `[x, y, z]`
/// vectors never qualify.
pub fn is_interpolation(
    previous: (f64, &Value),
    current: (f64, &Value),
    next: (f64, &Value),
    error_margin: f64,
) -> bool {
    let (Some(prev), Some(curr), Some(next_value)) =
        (as_vector(previous.1), as_vector(current.1), as_vector(next.1))
    else {
        return false;
    };
    let span = next.0 - previous.0;
    if span <= 0.0 {
        return false;
    }
    let t = (current.0 - previous.0) / span;
    let expected: [f64; 3] = std::array::from_fn(|i| prev[i] + t * (next_value[i] - prev[i]));
    let chord = distance(&prev, &next_value).max(1e-5);
    distance(&curr, &expected) / chord < error_margin
}

/// Removes keyframes of one timeline until a pass removes nothing.
///
/// A keyframe right after a removed one is left for the next pass. Keys that
/// are not numbers are ignored.
fn optimize_timeline(timeline: &mut Map<String, Value>, error_margin: f64) -> usize {
    let mut removed = 0;
    loop {
        let mut keys: Vec<(f64, String)> = timeline
            .keys()
            .filter_map(|key| key.parse::<f64>().ok().map(|time| (time, key.clone())))
            .collect();
        keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        if keys.len() < 3 {
            return removed;
        }

        let mut to_remove = Vec::new();
        let mut skip = false;
        for window in keys.windows(3) {
            if skip {
                skip = false;
                continue;
            }
            let [(prev_time, prev), (curr_time, curr), (next_time, next)] = window else {
                continue;
            };
            let (Some(prev_value), Some(curr_value), Some(next_value)) =
                (timeline.get(prev), timeline.get(curr), timeline.get(next))
            else {
                continue;
            };
            if is_interpolation(
                (*prev_time, prev_value),
                (*curr_time, curr_value),
                (*next_time, next_value),
                error_margin,
            ) {
                to_remove.push(curr.clone());
                skip = true;
            }
        }

        if to_remove.is_empty() {
            return removed;
        }
        removed += to_remove.len();
        for key in &to_remove {
            timeline.remove(key);
        }
    }
}

fn optimize_animation(animation: &mut Value, error_margin: f64, removed: &mut RemovedKeyframes) {
    let Some(bones) = animation.get_mut("bones").and_then(Value::as_object_mut) else {
        return;
    };
    for (bone_name, bone) in bones.iter_mut() {
        for channel in CHANNELS {
            let Some(timeline) = bone.get_mut(channel).and_then(Value::as_object_mut) else {
                continue;
            };
            let count = optimize_timeline(timeline, error_margin);
            if count > 0 {
                debug!("removed {count} {channel} keyframes from bone '{bone_name}'");
            }
            if let Some(total) = removed.channel_mut(channel) {
                *total += count;
            }
        }
    }
}

/// Optimizes animations of an engine animation file in place.
///
/// # Arguments
/// * `json` - Whole animation file.
/// * `error_margin` - Maximum deviation relative to the movement between the
///   neighbouring keyframes. `0` keeps every keyframe.
/// * `animation_name` - Name without the `animation.` prefix. `None`
///   optimizes every animation of the file.
///
/// # Returns
/// Counts of removed keyframes. A file without an `animations` object is left
/// untouched.
pub fn optimize_animation_json(json: &mut Value, error_margin: f64, animation_name: Option<&str>) -> RemovedKeyframes {
    let mut removed = RemovedKeyframes::default();
    let Some(animations) = json.get_mut("animations").and_then(Value::as_object_mut) else {
        return removed;
    };
    match animation_name {
        Some(name) => {
            if let Some(animation) = animations.get_mut(&format!("animation.{name}")) {
                optimize_animation(animation, error_margin, &mut removed);
            }
        }
        None => {
            for animation in animations.values_mut() {
                optimize_animation(animation, error_margin, &mut removed);
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn animation_file(position: Value) -> Value {
        json!({
            "format_version": "1.8.0",
            "animations": {
                "animation.walk": {
                    "animation_length": 1.0,
                    "bones": {"body": {"position": position}}
                }
            }
        })
    }

    #[test]
    fn given_collinear_keyframe_when_optimizing_then_it_is_removed() {
        let mut file = animation_file(json!({
            "0.0": [0.0, 0.0, 0.0],
            "0.5": [1.0, 0.0, 0.0],
            "1.0": [2.0, 0.0, 0.0]
        }));

        let removed = optimize_animation_json(&mut file, 0.05, None);

        assert_eq!(removed.position, 1);
        assert_eq!(
            file["animations"]["animation.walk"]["bones"]["body"]["position"],
            json!({"0.0": [0.0, 0.0, 0.0], "1.0": [2.0, 0.0, 0.0]})
        );
    }

    #[test]
    fn given_zero_margin_when_optimizing_then_nothing_is_removed() {
        let position = json!({
            "0.0": [0.0, 0.0, 0.0],
            "0.5": [1.0, 0.0, 0.0],
            "1.0": [2.0, 0.0, 0.0]
        });
        let mut file = animation_file(position.clone());

        let removed = optimize_animation_json(&mut file, 0.0, None);

        assert_eq!(removed.total(), 0);
        assert_eq!(file["animations"]["animation.walk"]["bones"]["body"]["position"], position);
    }

    #[test]
    fn given_long_straight_motion_when_optimizing_then_passes_repeat_until_stable() {
        let mut file = animation_file(json!({
            "0": [0.0, 0.0, 0.0],
            "1": [1.0, 0.0, 0.0],
            "2": [2.0, 0.0, 0.0],
            "3": [3.0, 0.0, 0.0],
            "4": [4.0, 0.0, 0.0]
        }));

        let removed = optimize_animation_json(&mut file, 0.01, None);

        assert_eq!(removed.position, 3);
        assert_eq!(
            file["animations"]["animation.walk"]["bones"]["body"]["position"],
            json!({"0": [0.0, 0.0, 0.0], "4": [4.0, 0.0, 0.0]})
        );
    }

    #[test]
    fn given_bent_motion_when_optimizing_then_corner_keyframe_is_kept() {
        let mut file = animation_file(json!({
            "0.0": [0.0, 0.0, 0.0],
            "0.5": [1.0, 1.0, 0.0],
            "1.0": [2.0, 0.0, 0.0]
        }));

        let removed = optimize_animation_json(&mut file, 0.05, None);

        assert_eq!(removed.total(), 0);
    }

    #[test]
    fn given_stepped_keyframe_when_optimizing_then_it_is_kept() {
        let mut file = animation_file(json!({
            "0.0": [0.0, 0.0, 0.0],
            "0.5": {"pre": [0.0, 0.0, 0.0], "post": [1.0, 0.0, 0.0]},
            "1.0": [2.0, 0.0, 0.0]
        }));

        let removed = optimize_animation_json(&mut file, 0.5, None);

        assert_eq!(removed.total(), 0);
    }

    #[test]
    fn given_animation_name_when_optimizing_then_other_animations_are_untouched() {
        let timeline = json!({
            "0.0": [0.0, 0.0, 0.0],
            "0.5": [0.0, 1.0, 0.0],
            "1.0": [0.0, 2.0, 0.0]
        });
        let mut file = json!({
            "animations": {
                "animation.walk": {"bones": {"body": {"rotation": timeline.clone()}}},
                "animation.run": {"bones": {"body": {"rotation": timeline.clone()}}}
            }
        });

        let removed = optimize_animation_json(&mut file, 0.05, Some("walk"));

        assert_eq!(removed.rotation, 1);
        assert_eq!(file["animations"]["animation.run"]["bones"]["body"]["rotation"], timeline);
    }
}
