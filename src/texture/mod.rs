//! Procedural face textures built from stacks of masks.
//!
//! A face raster starts white and every mask of the stack is applied in
//! order. Most masks produce a filter that is multiplied into the raster; the
//! color palette replaces it.

use image::{ImageBuffer, Luma, Rgb, Rgb32FImage};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type GrayLayer = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TextureError {
    #[error("invalid color '{value}': expected six hex digits \"rrggbb\"")]
    InvalidHexColor { value: String },
    #[error("stripe width must be greater than 0, got {width}")]
    InvalidStripeWidth { width: f32 },
    #[error("gradient stripes must have a positive total width")]
    EmptyGradient,
    #[error("color palette has no colors")]
    EmptyPalette,
}

// ─── Descriptors ────────────────────────────────────────────────────────────

/// Linear RGB color with channels in `0..=1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Parses `"rrggbb"`.
    pub fn from_hex(value: &str) -> Result<Self, TextureError> {
        let invalid = || TextureError::InvalidHexColor {
            value: value.to_string(),
        };
        if value.len() != 6 || !value.is_ascii() {
            return Err(invalid());
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&value[range], 16)
                .map(|c| f32::from(c) / 255.0)
                .map_err(|_| invalid())
        };
        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    fn channels(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

impl From<[f32; 3]> for Color {
    fn from([r, g, b]: [f32; 3]) -> Self {
        Self::new(r, g, b)
    }
}

impl From<Color> for [f32; 3] {
    fn from(color: Color) -> Self {
        color.channels()
    }
}

/// Width and brightness of one stripe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stripe {
    pub width: f32,
    pub strength: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixMode {
    #[default]
    Mean,
    Min,
    Max,
    Median,
}

fn default_strength() -> [f32; 2] {
    [0.0, 1.0]
}

fn default_exponent() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_children() -> usize {
    2
}

fn default_gradient_stripes() -> Vec<Stripe> {
    vec![
        Stripe {
            width: 0.0,
            strength: 0.0,
        },
        Stripe {
            width: 1.0,
            strength: 1.0,
        },
    ]
}

/// Two corners of the area a mask affects.
///
/// Relative points are fractions of the face size. Absolute points are pixels;
/// negative values count from the far edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwoPoints {
    pub p1: [f32; 2],
    pub p2: [f32; 2],
    #[serde(default = "default_true")]
    pub relative_boundaries: bool,
}

/// Serialized form of one mask, as stored in a UV-group side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mask_type", rename_all = "snake_case")]
pub enum MaskKind {
    ColorPalette {
        colors: Vec<Color>,
        #[serde(default)]
        interpolate: bool,
        #[serde(default)]
        normalize: bool,
    },
    Gradient {
        #[serde(flatten)]
        points: TwoPoints,
        #[serde(default = "default_gradient_stripes")]
        stripes: Vec<Stripe>,
        #[serde(default = "default_exponent")]
        exponent: f32,
    },
    Ellipse {
        #[serde(flatten)]
        points: TwoPoints,
        #[serde(default = "default_strength")]
        strength: [f32; 2],
        #[serde(default)]
        hard_edge: bool,
        #[serde(default = "default_exponent")]
        exponent: f32,
    },
    Rectangle {
        #[serde(flatten)]
        points: TwoPoints,
        #[serde(default = "default_strength")]
        strength: [f32; 2],
        #[serde(default)]
        hard_edge: bool,
        #[serde(default = "default_exponent")]
        exponent: f32,
    },
    Stripes {
        stripes: Vec<Stripe>,
        #[serde(default = "default_true")]
        horizontal: bool,
        #[serde(default = "default_true")]
        relative_boundaries: bool,
    },
    Random {
        #[serde(default = "default_strength")]
        strength: [f32; 2],
        #[serde(default = "default_exponent")]
        exponent: f32,
        #[serde(default)]
        seed: Option<u64>,
    },
    Color {
        color: Color,
    },
    /// Combines the next `children` descriptors of the list.
    Mix {
        #[serde(default = "default_children")]
        children: usize,
        #[serde(default = "default_strength")]
        strength: [f32; 2],
        #[serde(default = "default_exponent")]
        exponent: f32,
        #[serde(default)]
        mode: MixMode,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskDescriptor {
    #[serde(default)]
    pub hidden: bool,
    #[serde(flatten)]
    pub kind: MaskKind,
}

impl From<MaskKind> for MaskDescriptor {
    fn from(kind: MaskKind) -> Self {
        Self {
            hidden: false,
            kind,
        }
    }
}

/// Named set of mask stacks, one per cube side.
///
/// Sides follow the box layout: `side1` east (west when mirrored), `side2`
/// north, `side3` west (east when mirrored), `side4` south, `side5` up and
/// `side6` down.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UvGroup {
    pub name: String,
    #[serde(default)]
    pub side1: Vec<MaskDescriptor>,
    #[serde(default)]
    pub side2: Vec<MaskDescriptor>,
    #[serde(default)]
    pub side3: Vec<MaskDescriptor>,
    #[serde(default)]
    pub side4: Vec<MaskDescriptor>,
    #[serde(default)]
    pub side5: Vec<MaskDescriptor>,
    #[serde(default)]
    pub side6: Vec<MaskDescriptor>,
}

impl UvGroup {
    pub fn sides(&self) -> [&[MaskDescriptor]; 6] {
        [
            &self.side1,
            &self.side2,
            &self.side3,
            &self.side4,
            &self.side5,
            &self.side6,
        ]
    }

    /// Builds the mask stacks of all six sides.
    pub fn masks(&self) -> Result<[Vec<Mask>; 6], TextureError> {
        let [s1, s2, s3, s4, s5, s6] = self.sides();
        Ok([
            build_masks(s1)?,
            build_masks(s2)?,
            build_masks(s3)?,
            build_masks(s4)?,
            build_masks(s5)?,
            build_masks(s6)?,
        ])
    }
}

/// Solid colors painted on faces of cubes without a UV-group.
pub fn default_side_masks() -> [Vec<Mask>; 6] {
    [
        vec![Mask::Color(Color::new(0.0, 1.0, 0.0))],
        vec![Mask::Color(Color::new(1.0, 0.0, 1.0))],
        vec![Mask::Color(Color::new(1.0, 0.0, 0.0))],
        vec![Mask::Color(Color::new(0.0, 1.0, 1.0))],
        vec![Mask::Color(Color::new(0.0, 0.0, 1.0))],
        vec![Mask::Color(Color::new(1.0, 1.0, 0.0))],
    ]
}

// ─── Masks ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Mask {
    ColorPalette {
        colors: Vec<Color>,
        interpolate: bool,
        normalize: bool,
    },
    Gradient {
        points: TwoPoints,
        /// Normalized so the widths sum to 1.
        stripes: Vec<Stripe>,
        exponent: f32,
    },
    Ellipse {
        points: TwoPoints,
        strength: [f32; 2],
        hard_edge: bool,
        exponent: f32,
    },
    Rectangle {
        points: TwoPoints,
        strength: [f32; 2],
        hard_edge: bool,
        exponent: f32,
    },
    Stripes {
        stripes: Vec<Stripe>,
        horizontal: bool,
        relative_boundaries: bool,
    },
    Random {
        strength: [f32; 2],
        exponent: f32,
        seed: Option<u64>,
    },
    Color(Color),
    Mix {
        masks: Vec<Mask>,
        strength: [f32; 2],
        exponent: f32,
        mode: MixMode,
    },
    /// Identity filter used for hidden masks.
    Dummy,
}

/// Builds masks from a flat descriptor list.
///
/// A mix descriptor takes the descriptors right after it as its children;
/// color palettes among them are dropped because they produce no filter.
pub fn build_masks(descriptors: &[MaskDescriptor]) -> Result<Vec<Mask>, TextureError> {
    let mut iter = descriptors.iter();
    take_masks(&mut iter, descriptors.len())
}

fn take_masks<'a>(
    iter: &mut impl Iterator<Item = &'a MaskDescriptor>,
    count: usize,
) -> Result<Vec<Mask>, TextureError> {
    let mut result = Vec::new();
    for _ in 0..count {
        let Some(descriptor) = iter.next() else {
            break;
        };
        let mask = match &descriptor.kind {
            MaskKind::ColorPalette {
                colors,
                interpolate,
                normalize,
            } => {
                if colors.is_empty() {
                    return Err(TextureError::EmptyPalette);
                }
                Mask::ColorPalette {
                    colors: colors.clone(),
                    interpolate: *interpolate,
                    normalize: *normalize,
                }
            }
            MaskKind::Gradient {
                points,
                stripes,
                exponent,
            } => {
                if let Some(stripe) = stripes.iter().find(|s| s.width < 0.0) {
                    return Err(TextureError::InvalidStripeWidth {
                        width: stripe.width,
                    });
                }
                let total: f32 = stripes.iter().map(|s| s.width).sum();
                if total <= 0.0 {
                    return Err(TextureError::EmptyGradient);
                }
                Mask::Gradient {
                    points: *points,
                    stripes: stripes
                        .iter()
                        .map(|s| Stripe {
                            width: s.width / total,
                            strength: s.strength,
                        })
                        .collect(),
                    exponent: *exponent,
                }
            }
            MaskKind::Ellipse {
                points,
                strength,
                hard_edge,
                exponent,
            } => Mask::Ellipse {
                points: *points,
                strength: *strength,
                hard_edge: *hard_edge,
                exponent: *exponent,
            },
            MaskKind::Rectangle {
                points,
                strength,
                hard_edge,
                exponent,
            } => Mask::Rectangle {
                points: *points,
                strength: *strength,
                hard_edge: *hard_edge,
                exponent: *exponent,
            },
            MaskKind::Stripes {
                stripes,
                horizontal,
                relative_boundaries,
            } => {
                if let Some(stripe) = stripes.iter().find(|s| s.width <= 0.0) {
                    return Err(TextureError::InvalidStripeWidth {
                        width: stripe.width,
                    });
                }
                Mask::Stripes {
                    stripes: stripes.clone(),
                    horizontal: *horizontal,
                    relative_boundaries: *relative_boundaries,
                }
            }
            MaskKind::Random {
                strength,
                exponent,
                seed,
            } => Mask::Random {
                strength: *strength,
                exponent: *exponent,
                seed: *seed,
            },
            MaskKind::Color { color } => Mask::Color(*color),
            MaskKind::Mix {
                children,
                strength,
                exponent,
                mode,
            } => Mask::Mix {
                masks: take_masks(iter, *children)?
                    .into_iter()
                    .filter(|mask| !matches!(mask, Mask::ColorPalette { .. }))
                    .collect(),
                strength: *strength,
                exponent: *exponent,
                mode: *mode,
            },
        };
        result.push(if descriptor.hidden { Mask::Dummy } else { mask });
    }
    Ok(result)
}

/// Applies masks to `image` in order.
pub fn apply_masks(image: &mut Rgb32FImage, masks: &[Mask]) {
    for mask in masks {
        mask.apply(image);
    }
}

/// Filter produced by a multiplicative mask.
#[derive(Debug, Clone, PartialEq)]
pub enum MaskLayer {
    Gray(GrayLayer),
    Rgb(Rgb32FImage),
}

impl MaskLayer {
    fn value(&self, x: u32, y: u32, channel: usize) -> f32 {
        match self {
            MaskLayer::Gray(layer) => layer.get_pixel(x, y).0[0],
            MaskLayer::Rgb(layer) => layer.get_pixel(x, y).0[channel],
        }
    }
}

impl Mask {
    pub fn apply(&self, image: &mut Rgb32FImage) {
        if let Mask::ColorPalette {
            colors,
            interpolate,
            normalize,
        } = self
        {
            apply_palette(image, colors, *interpolate, *normalize);
            return;
        }
        let Some(layer) = self.layer(image.width(), image.height()) else {
            return;
        };
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            for channel in 0..3 {
                pixel.0[channel] *= layer.value(x, y, channel);
            }
        }
    }

    /// Filter of a `width` x `height` face; `None` for the color palette.
    pub fn layer(&self, width: u32, height: u32) -> Option<MaskLayer> {
        let layer = match self {
            Mask::ColorPalette { .. } => return None,
            Mask::Dummy => GrayLayer::from_pixel(width, height, Luma([1.0])),
            Mask::Color(color) => {
                return Some(MaskLayer::Rgb(Rgb32FImage::from_pixel(
                    width,
                    height,
                    Rgb(color.channels()),
                )));
            }
            Mask::Gradient {
                points,
                stripes,
                exponent,
            } => gradient_layer(points, stripes, *exponent, width, height),
            Mask::Ellipse {
                points,
                strength,
                hard_edge,
                exponent,
            } => ellipse_layer(points, *strength, *hard_edge, *exponent, width, height),
            Mask::Rectangle {
                points,
                strength,
                hard_edge,
                exponent,
            } => rectangle_layer(points, *strength, *hard_edge, *exponent, width, height),
            Mask::Stripes {
                stripes,
                horizontal,
                relative_boundaries,
            } => stripes_layer(stripes, *horizontal, *relative_boundaries, width, height),
            Mask::Random {
                strength,
                exponent,
                seed,
            } => {
                let mut rng = match seed {
                    Some(seed) => Pcg32::seed_from_u64(*seed),
                    None => Pcg32::from_entropy(),
                };
                GrayLayer::from_fn(width, height, |_, _| {
                    let value: f32 = rng.r#gen();
                    Luma([remap(value, *strength).powf(*exponent)])
                })
            }
            Mask::Mix {
                masks,
                strength,
                exponent,
                mode,
            } => return Some(mix_layer(masks, *strength, *exponent, *mode, width, height)),
        };
        Some(MaskLayer::Gray(layer))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Piecewise-linear interpolation clamped to the end values.
///
/// `xp` must be non-decreasing; where two `xp` entries are equal the later
/// value wins.
fn interp(x: f32, xp: &[f32], fp: &[f32]) -> f32 {
    let (Some(&first), Some(&last)) = (xp.first(), xp.last()) else {
        return x;
    };
    if x < first {
        return fp[0];
    }
    if x >= last {
        return fp[fp.len() - 1];
    }
    let i = xp.partition_point(|&p| p <= x) - 1;
    let (x0, x1) = (xp[i], xp[i + 1]);
    if x1 == x0 {
        return fp[i + 1];
    }
    fp[i] + (fp[i + 1] - fp[i]) * (x - x0) / (x1 - x0)
}

/// Maps a value from `0..=1` onto the `strength` range.
fn remap(value: f32, strength: [f32; 2]) -> f32 {
    interp(value, &[0.0, 1.0], &strength)
}

/// Pixel corners `(u1, u2, v1, v2)` of a two-point mask.
fn surface_points(points: &TwoPoints, width: u32, height: u32, sort: bool) -> (i64, i64, i64, i64) {
    let size = [i64::from(width), i64::from(height)];
    let resolve = |p: [f32; 2]| -> [i64; 2] {
        let mut result = [0; 2];
        for axis in 0..2 {
            let value = if points.relative_boundaries {
                ((p[axis] * size[axis] as f32) as i64).clamp(0, (size[axis] - 1).max(0))
            } else {
                p[axis] as i64
            };
            result[axis] = value.rem_euclid(size[axis].max(1));
        }
        result
    };
    let [mut u1, mut v1] = resolve(points.p1);
    let [mut u2, mut v2] = resolve(points.p2);
    if sort {
        (u1, u2) = (u1.min(u2), u1.max(u2));
        (v1, v2) = (v1.min(v2), v1.max(v2));
    }
    (u1, u2, v1, v2)
}

fn gradient_layer(points: &TwoPoints, stripes: &[Stripe], exponent: f32, width: u32, height: u32) -> GrayLayer {
    let (u1, u2, v1, v2) = surface_points(points, width, height, false);
    let a = [u1 as f32, v1 as f32];
    let d = [(u2 - u1) as f32, (v2 - v1) as f32];
    let length = (d[0] * d[0] + d[1] * d[1]).sqrt();
    let mut xp = Vec::with_capacity(stripes.len());
    let mut total = 0.0;
    for stripe in stripes {
        total += stripe.width * length;
        xp.push(total);
    }
    let fp: Vec<f32> = stripes.iter().map(|s| s.strength).collect();
    GrayLayer::from_fn(width, height, |x, y| {
        let p = [x as f32 - a[0], y as f32 - a[1]];
        let distance = if length == 0.0 {
            p[0].abs()
        } else {
            (p[0] * d[0] + p[1] * d[1]).abs() / length
        };
        Luma([interp(distance, &xp, &fp).powf(exponent)])
    })
}

fn ellipse_layer(
    points: &TwoPoints,
    strength: [f32; 2],
    hard_edge: bool,
    exponent: f32,
    width: u32,
    height: u32,
) -> GrayLayer {
    let (u1, u2, v1, v2) = surface_points(points, width, height, true);
    let a = ((u2 - u1) as f32 / 2.0).max(1.0);
    let b = ((v2 - v1) as f32 / 2.0).max(1.0);
    let center = [(u1 + u2) as f32 / 2.0, (v1 + v2) as f32 / 2.0];
    let mut layer = GrayLayer::from_fn(width, height, |x, y| {
        let dx = x as f32 + 0.5 - center[0];
        let dy = y as f32 + 0.5 - center[1];
        Luma([dx * dx / (a * a) + dy * dy / (b * b)])
    });

    let outside = layer.pixels().map(|p| p.0[0]).filter(|&value| value > 1.0);
    let range = outside.fold(None, |range: Option<(f32, f32)>, value| {
        Some(range.map_or((value, value), |(lo, hi)| (lo.min(value), hi.max(value))))
    });
    for pixel in layer.pixels_mut() {
        let inside = pixel.0[0] <= 1.0;
        let value = if hard_edge {
            if inside { strength[0] } else { strength[1] }
        } else {
            let value = if inside { strength[1] } else { pixel.0[0] };
            match range {
                Some((lo, hi)) => interp(value, &[lo, hi], &strength),
                None => value,
            }
        };
        pixel.0[0] = value.powf(exponent);
    }
    layer
}

fn rectangle_layer(
    points: &TwoPoints,
    strength: [f32; 2],
    hard_edge: bool,
    exponent: f32,
    width: u32,
    height: u32,
) -> GrayLayer {
    let (u1, u2, v1, v2) = surface_points(points, width, height, true);
    let inside = |x: i64, y: i64| (u1..=u2).contains(&x) && (v1..=v2).contains(&y);
    let covers_all = u1 == 0 && v1 == 0 && u2 + 1 == i64::from(width) && v2 + 1 == i64::from(height);
    if hard_edge || covers_all {
        return GrayLayer::from_fn(width, height, |x, y| {
            Luma([if inside(i64::from(x), i64::from(y)) {
                strength[0]
            } else {
                strength[1]
            }])
        });
    }

    // Distance to the rectangle, zero inside.
    let mut layer = GrayLayer::from_fn(width, height, |x, y| {
        let (x, y) = (i64::from(x), i64::from(y));
        let dx = (u1 - x).max(x - u2).max(0) as f32;
        let dy = (v1 - y).max(y - v2).max(0) as f32;
        Luma([(dx * dx + dy * dy).sqrt()])
    });
    let (lo, hi) = layer
        .pixels()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.0[0]), hi.max(p.0[0]))
        });
    for pixel in layer.pixels_mut() {
        pixel.0[0] = interp(pixel.0[0], &[lo, hi], &strength).powf(exponent);
    }
    layer
}

/// Horizontal stripes are bands stacked along the height; vertical ones
/// along the width.
fn stripes_layer(stripes: &[Stripe], horizontal: bool, relative: bool, width: u32, height: u32) -> GrayLayer {
    let limit = if horizontal { height } else { width } as usize;
    let mut bands = vec![1.0_f32; limit];
    if !stripes.is_empty() {
        let mut previous = 0usize;
        let mut accumulated = 0.0_f32;
        for stripe in stripes.iter().cycle() {
            let mut stripe_width = stripe.width;
            if relative {
                stripe_width *= limit as f32;
            }
            accumulated += stripe_width.max(1.0);
            let current = accumulated as usize;
            for band in bands.iter_mut().take(current.min(limit)).skip(previous) {
                *band = stripe.strength;
            }
            previous = current;
            if current >= limit {
                break;
            }
        }
    }
    GrayLayer::from_fn(width, height, |x, y| {
        Luma([bands[if horizontal { y } else { x } as usize]])
    })
}

fn mix_layer(masks: &[Mask], strength: [f32; 2], exponent: f32, mode: MixMode, width: u32, height: u32) -> MaskLayer {
    let layers: Vec<MaskLayer> = masks
        .iter()
        .filter_map(|mask| mask.layer(width, height))
        .collect();
    if layers.is_empty() {
        return MaskLayer::Gray(GrayLayer::from_pixel(width, height, Luma([1.0])));
    }
    let mut values = Vec::with_capacity(layers.len());
    let mut combine = |x: u32, y: u32, channel: usize| {
        values.clear();
        values.extend(layers.iter().map(|layer| layer.value(x, y, channel)));
        let combined = match mode {
            MixMode::Mean => values.iter().sum::<f32>() / values.len() as f32,
            MixMode::Min => values.iter().copied().fold(f32::INFINITY, f32::min),
            MixMode::Max => values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            MixMode::Median => {
                values.sort_by(f32::total_cmp);
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    (values[mid - 1] + values[mid]) / 2.0
                } else {
                    values[mid]
                }
            }
        };
        remap(combined, strength).powf(exponent)
    };
    if layers.iter().any(|layer| matches!(layer, MaskLayer::Rgb(_))) {
        MaskLayer::Rgb(Rgb32FImage::from_fn(width, height, |x, y| {
            Rgb([combine(x, y, 0), combine(x, y, 1), combine(x, y, 2)])
        }))
    } else {
        MaskLayer::Gray(GrayLayer::from_fn(width, height, |x, y| Luma([combine(x, y, 0)])))
    }
}

fn apply_palette(image: &mut Rgb32FImage, colors: &[Color], interpolate: bool, normalize: bool) {
    let Some(&first) = colors.first() else {
        return;
    };
    let count = colors.len();
    let (xp, palette): (Vec<f32>, Vec<Color>) = if interpolate {
        if count == 1 {
            (vec![0.0], vec![first])
        } else {
            (
                (0..count).map(|i| i as f32 / (count - 1) as f32).collect(),
                colors.to_vec(),
            )
        }
    } else {
        // Each color owns an equal share of the range.
        let mut xp = vec![0.0];
        for i in 1..count {
            let edge = i as f32 / count as f32;
            xp.push(edge);
            xp.push(edge);
        }
        xp.push(1.0);
        (xp, colors.iter().flat_map(|&c| [c, c]).collect())
    };

    let gray: Vec<f32> = image
        .pixels()
        .map(|p| (p.0[0] + p.0[1] + p.0[2]) / 3.0)
        .collect();
    let (lo, hi) = gray
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &g| (lo.min(g), hi.max(g)));
    let channels: [Vec<f32>; 3] = [
        palette.iter().map(|c| c.r).collect(),
        palette.iter().map(|c| c.g).collect(),
        palette.iter().map(|c| c.b).collect(),
    ];
    for (pixel, &value) in image.pixels_mut().zip(&gray) {
        let value = if normalize && hi > lo {
            interp(value, &[lo, hi], &[0.0, 1.0])
        } else {
            value
        };
        for channel in 0..3 {
            pixel.0[channel] = interp(value, &xp, &channels[channel]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn white(width: u32, height: u32) -> Rgb32FImage {
        Rgb32FImage::from_pixel(width, height, Rgb([1.0, 1.0, 1.0]))
    }

    fn gray_at(layer: &MaskLayer, x: u32, y: u32) -> f32 {
        layer.value(x, y, 0)
    }

    #[test]
    fn given_hex_string_when_parsing_color_then_channels_are_scaled() {
        let color = Color::from_hex("ff0080").expect("valid hex");

        assert_eq!(color.r, 1.0);
        assert_eq!(color.g, 0.0);
        assert!((color.b - 128.0 / 255.0).abs() < 1e-6);
        assert!(Color::from_hex("fff").is_err());
        assert!(Color::from_hex("gg0000").is_err());
    }

    #[test]
    fn given_color_mask_when_applied_then_pixels_are_multiplied() {
        let mut image = white(2, 2);
        image.put_pixel(1, 1, Rgb([0.5, 0.5, 0.5]));

        apply_masks(&mut image, &[Mask::Color(Color::new(1.0, 0.5, 0.0))]);

        assert_eq!(image.get_pixel(0, 0).0, [1.0, 0.5, 0.0]);
        assert_eq!(image.get_pixel(1, 1).0, [0.5, 0.25, 0.0]);
    }

    #[test]
    fn given_two_color_palette_when_applied_then_brightness_picks_nearest_color() {
        let mut image = white(2, 1);
        image.put_pixel(0, 0, Rgb([0.2, 0.2, 0.2]));
        let red = Color::new(1.0, 0.0, 0.0);
        let blue = Color::new(0.0, 0.0, 1.0);

        apply_masks(
            &mut image,
            &[Mask::ColorPalette {
                colors: vec![red, blue],
                interpolate: false,
                normalize: false,
            }],
        );

        assert_eq!(image.get_pixel(0, 0).0, [1.0, 0.0, 0.0]);
        assert_eq!(image.get_pixel(1, 0).0, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn given_hard_edge_rectangle_when_building_layer_then_inside_uses_first_strength() {
        let mask = Mask::Rectangle {
            points: TwoPoints {
                p1: [1.0, 1.0],
                p2: [2.0, 2.0],
                relative_boundaries: false,
            },
            strength: [0.25, 1.0],
            hard_edge: true,
            exponent: 1.0,
        };

        let layer = mask.layer(4, 4).expect("multiplicative mask");

        assert_eq!(gray_at(&layer, 1, 1), 0.25);
        assert_eq!(gray_at(&layer, 2, 2), 0.25);
        assert_eq!(gray_at(&layer, 0, 0), 1.0);
        assert_eq!(gray_at(&layer, 3, 1), 1.0);
    }

    #[test]
    fn given_soft_rectangle_when_building_layer_then_value_grows_with_distance() {
        let mask = Mask::Rectangle {
            points: TwoPoints {
                p1: [0.0, 0.0],
                p2: [0.0, 0.0],
                relative_boundaries: false,
            },
            strength: [0.0, 1.0],
            hard_edge: false,
            exponent: 1.0,
        };

        let layer = mask.layer(3, 1).expect("multiplicative mask");

        assert_eq!(gray_at(&layer, 0, 0), 0.0);
        assert_eq!(gray_at(&layer, 1, 0), 0.5);
        assert_eq!(gray_at(&layer, 2, 0), 1.0);
    }

    #[test]
    fn given_negative_absolute_point_when_resolving_then_it_counts_from_far_edge() {
        let points = TwoPoints {
            p1: [-1.0, 0.0],
            p2: [0.0, -2.0],
            relative_boundaries: false,
        };

        assert_eq!(surface_points(&points, 8, 4, false), (7, 0, 0, 2));
    }

    #[test]
    fn given_hard_edge_ellipse_when_building_layer_then_center_is_inside() {
        let mask = Mask::Ellipse {
            points: TwoPoints {
                p1: [0.0, 0.0],
                p2: [1.0, 1.0],
                relative_boundaries: true,
            },
            strength: [0.0, 1.0],
            hard_edge: true,
            exponent: 1.0,
        };

        let layer = mask.layer(8, 8).expect("multiplicative mask");

        assert_eq!(gray_at(&layer, 4, 4), 0.0);
        assert_eq!(gray_at(&layer, 0, 0), 1.0);
    }

    #[test]
    fn given_horizontal_stripes_when_building_layer_then_bands_stack_along_height() {
        let mask = Mask::Stripes {
            stripes: vec![
                Stripe {
                    width: 1.0,
                    strength: 0.0,
                },
                Stripe {
                    width: 2.0,
                    strength: 0.5,
                },
            ],
            horizontal: true,
            relative_boundaries: false,
        };

        let layer = mask.layer(2, 6).expect("multiplicative mask");

        let column: Vec<f32> = (0..6).map(|y| gray_at(&layer, 1, y)).collect();
        assert_eq!(column, vec![0.0, 0.5, 0.5, 0.0, 0.5, 0.5]);
        assert_eq!(gray_at(&layer, 0, 3), 0.0);
    }

    #[test]
    fn given_gradient_between_edges_when_building_layer_then_values_ramp() {
        let mask = build_masks(&[MaskDescriptor::from(MaskKind::Gradient {
            points: TwoPoints {
                p1: [0.0, 0.0],
                p2: [4.0, 0.0],
                relative_boundaries: false,
            },
            stripes: default_gradient_stripes(),
            exponent: 1.0,
        })])
        .expect("valid gradient");

        let layer = mask[0].layer(5, 1).expect("multiplicative mask");

        let row: Vec<f32> = (0..5).map(|x| gray_at(&layer, x, 0)).collect();
        assert_eq!(row, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn given_seed_when_building_random_layer_then_values_repeat_and_stay_in_range() {
        let mask = Mask::Random {
            strength: [0.5, 1.0],
            exponent: 1.0,
            seed: Some(7),
        };

        let first = mask.layer(4, 4).expect("multiplicative mask");
        let second = mask.layer(4, 4).expect("multiplicative mask");

        assert_eq!(first, second);
        for y in 0..4 {
            for x in 0..4 {
                let value = gray_at(&first, x, y);
                assert!((0.5..=1.0).contains(&value), "{value}");
            }
        }
    }

    #[test]
    fn given_mix_descriptor_when_building_then_following_masks_become_children() {
        let descriptors: Vec<MaskDescriptor> = vec![
            MaskKind::Mix {
                children: 3,
                strength: [0.0, 1.0],
                exponent: 1.0,
                mode: MixMode::Min,
            }
            .into(),
            MaskKind::Color {
                color: Color::new(0.5, 1.0, 1.0),
            }
            .into(),
            MaskKind::ColorPalette {
                colors: vec![Color::new(0.0, 0.0, 0.0)],
                interpolate: false,
                normalize: false,
            }
            .into(),
            MaskKind::Color {
                color: Color::new(1.0, 0.25, 1.0),
            }
            .into(),
            MaskKind::Color {
                color: Color::new(1.0, 1.0, 0.0),
            }
            .into(),
        ];

        let masks = build_masks(&descriptors).expect("valid masks");
        let mut image = white(1, 1);
        apply_masks(&mut image, &masks);

        assert_eq!(masks.len(), 2);
        assert!(matches!(&masks[0], Mask::Mix { masks, .. } if masks.len() == 2));
        assert_eq!(image.get_pixel(0, 0).0, [0.5, 0.25, 0.0]);
    }

    #[test]
    fn given_hidden_descriptor_when_building_then_mask_is_identity() {
        let descriptor = MaskDescriptor {
            hidden: true,
            kind: MaskKind::Color {
                color: Color::new(0.0, 0.0, 0.0),
            },
        };

        let masks = build_masks(&[descriptor]).expect("valid masks");
        let mut image = white(2, 2);
        apply_masks(&mut image, &masks);

        assert_eq!(masks, vec![Mask::Dummy]);
        assert_eq!(image.get_pixel(1, 1).0, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn given_uv_group_json_when_deserializing_then_descriptors_are_read() {
        let group: UvGroup = serde_json::from_value(serde_json::json!({
            "name": "skin",
            "side1": [
                {"mask_type": "color", "color": [1.0, 0.0, 0.0]},
                {"mask_type": "ellipse", "p1": [0.1, 0.1], "p2": [0.9, 0.9], "hidden": true}
            ]
        }))
        .expect("valid group");

        assert_eq!(group.side1.len(), 2);
        assert!(group.side1[1].hidden);
        assert!(group.side2.is_empty());
        let masks = group.masks().expect("valid masks");
        assert_eq!(masks[0], vec![Mask::Color(Color::new(1.0, 0.0, 0.0)), Mask::Dummy]);
    }
}
