use std::collections::{HashMap, HashSet};

use log::{debug, info};
use nalgebra::{Matrix4, Vector3};
use serde_json::{Map, Value};

use super::{CubeUv, Face, FaceRect, default_face_rects};
use crate::error::{ConversionError, JsonPath};
use crate::math::{MINECRAFT_SCALE_FACTOR, rotation_from_mc, swap_yz};
use crate::scene::ObjectId;

type Result<T> = std::result::Result<T, ConversionError>;

// ─── Records ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ImportGeometry {
    pub identifier: String,
    pub texture_width: u32,
    pub texture_height: u32,
    pub visible_bounds_width: f64,
    pub visible_bounds_height: f64,
    pub visible_bounds_offset: [f64; 3],
    pub bones: Vec<ImportBone>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportBone {
    pub name: String,
    pub parent: Option<String>,
    pub pivot: [f64; 3],
    pub rotation: [f64; 3],
    pub mirror: bool,
    pub inflate: f64,
    pub cubes: Vec<ImportCube>,
    pub locators: Vec<ImportLocator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportCube {
    pub origin: [f64; 3],
    pub size: [f64; 3],
    pub rotation: [f64; 3],
    pub pivot: [f64; 3],
    pub inflate: f64,
    pub mirror: bool,
    pub uv: CubeUv,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportLocator {
    pub name: String,
    pub offset: [f64; 3],
    pub rotation: [f64; 3],
}

impl ImportCube {
    /// Rectangles of all six faces in engine pixels.
    ///
    /// Faces missing from a per-face mapping are placed outside the texture.
    pub fn face_rects(&self) -> [FaceRect; 6] {
        match &self.uv {
            CubeUv::Default { uv } => default_face_rects(self.size, *uv, self.mirror),
            CubeUv::PerFace(faces) => {
                let mut rects = [FaceRect::new([0.0, -1.0], [0.0, 0.0]); 6];
                for (face, rect) in faces {
                    rects[face.index()] = if self.mirror { rect.flipped_u() } else { *rect };
                }
                rects
            }
        }
    }
}

// ─── Format versions ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormatParser {
    /// `1.8.0` up to `1.12.0`: geometries keyed by `geometry.<name>`.
    Legacy,
    /// `1.12.0` and later: `minecraft:geometry` array.
    Modern,
}

/// Picks the newest parser not newer than `version`.
fn pick_version_parser(version: &str) -> Result<FormatParser> {
    let parsed: Option<Vec<u32>> = version.split('.').map(|part| part.parse().ok()).collect();
    let Some(parsed) = parsed else {
        return Err(ConversionError::UnsupportedFormatVersion {
            version: version.to_string(),
        });
    };
    if parsed >= vec![1, 12, 0] {
        Ok(FormatParser::Modern)
    } else if parsed >= vec![1, 8, 0] {
        Ok(FormatParser::Legacy)
    } else {
        Err(ConversionError::UnsupportedFormatVersion {
            version: version.to_string(),
        })
    }
}

// ─── Structural assertions ──────────────────────────────────────────────────

fn expect_object<'a>(value: &'a Value, what: &str, path: &JsonPath) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| ConversionError::structural(path, format!("{what} is not an object")))
}

fn expect_array<'a>(value: &'a Value, what: &str, path: &JsonPath) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| ConversionError::structural(path, format!("{what} is not a list")))
}

fn expect_keys(
    map: &Map<String, Value>,
    what: &str,
    required: &[&str],
    accepted: &[&str],
    path: &JsonPath,
) -> Result<()> {
    let mut missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| !map.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(ConversionError::structural(
            path,
            format!("{what} is missing properties: {}", missing.join(", ")),
        ));
    }
    let mut unexpected: Vec<&str> = map
        .keys()
        .map(String::as_str)
        .filter(|key| !accepted.contains(key))
        .collect();
    if !unexpected.is_empty() {
        unexpected.sort_unstable();
        return Err(ConversionError::structural(
            path,
            format!("{what} has unexpected properties: {}", unexpected.join(", ")),
        ));
    }
    Ok(())
}

fn reject_unsupported(map: &Map<String, Value>, features: &[&str], path: &JsonPath) -> Result<()> {
    match features.iter().find(|feature| map.contains_key(**feature)) {
        Some(feature) => Err(ConversionError::UnsupportedFeature {
            feature: feature.to_string(),
            path: path.key(feature).to_string(),
        }),
        None => Ok(()),
    }
}

fn read_number(value: &Value, name: &str, path: &JsonPath) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| ConversionError::structural(path, format!("{name} is not a number")))
}

fn read_bool(value: &Value, name: &str, path: &JsonPath) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| ConversionError::structural(path, format!("{name} is not a boolean")))
}

fn read_string(value: &Value, name: &str, path: &JsonPath) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConversionError::structural(path, format!("{name} is not a string")))
}

fn read_vector<const N: usize>(value: &Value, name: &str, path: &JsonPath) -> Result<[f64; N]> {
    let items = value
        .as_array()
        .ok_or_else(|| ConversionError::structural(path, format!("{name} is not a list")))?;
    if items.len() != N {
        return Err(ConversionError::structural(
            path,
            format!("{name} has invalid length {} != {N}", items.len()),
        ));
    }
    let mut result = [0.0; N];
    for (slot, item) in result.iter_mut().zip(items) {
        *slot = item.as_f64().ok_or_else(|| {
            ConversionError::structural(path, format!("{name} is not a list of numbers"))
        })?;
    }
    Ok(result)
}

fn read_texture_size(value: &Value, name: &str, path: &JsonPath) -> Result<u32> {
    let size = read_number(value, name, path)?;
    if size < 0.0 {
        return Err(ConversionError::structural(path, format!("{name} must not be negative")));
    }
    Ok(size as u32)
}

// ─── Loading ────────────────────────────────────────────────────────────────

/// Validates the structure of a whole model file, every geometry included.
///
/// # Errors
/// [`ConversionError::StructuralValidation`] naming the first offending JSON
/// path, or a format/feature error for content this importer cannot represent.
pub fn assert_is_model(data: &Value) -> Result<()> {
    let parser = load_format_version(data)?;
    for (geometry, path) in geometries(data, parser)? {
        parse_geometry(geometry, &path, parser)?;
    }
    Ok(())
}

/// Parses one geometry of a model file.
///
/// With an empty `geometry_name` the first geometry is used; otherwise the
/// identifier must match, with or without the `geometry.` prefix.
///
/// Every geometry of the file is validated, the selected one included.
pub fn load_model(data: &Value, geometry_name: &str) -> Result<ImportGeometry> {
    let parser = load_format_version(data)?;
    let parsed: Vec<ImportGeometry> = geometries(data, parser)?
        .into_iter()
        .map(|(geometry, path)| parse_geometry(geometry, &path, parser))
        .collect::<Result<_>>()?;
    for parsed in parsed {
        let short = parsed
            .identifier
            .strip_prefix("geometry.")
            .unwrap_or(&parsed.identifier);
        if geometry_name.is_empty() || geometry_name == parsed.identifier || geometry_name == short {
            info!(
                "loaded {} with {} bones",
                parsed.identifier,
                parsed.bones.len()
            );
            return Ok(parsed);
        }
    }
    Err(ConversionError::GeometryNotFound {
        identifier: geometry_name.to_string(),
    })
}

fn load_format_version(data: &Value) -> Result<FormatParser> {
    let root = JsonPath::root();
    let map = expect_object(data, "model file", &root)?;
    let version = map
        .get("format_version")
        .ok_or_else(|| ConversionError::structural(&root, "model file is missing properties: format_version"))?;
    let version = read_string(version, "format_version", &root.key("format_version"))?;
    let parser = pick_version_parser(&version)?;
    match parser {
        FormatParser::Modern => {
            expect_keys(
                map,
                "model file",
                &["format_version", "minecraft:geometry"],
                &["format_version", "minecraft:geometry", "cape"],
                &root,
            )?;
            reject_unsupported(map, &["cape"], &root)?;
        }
        FormatParser::Legacy => {
            for key in map.keys() {
                if key != "format_version" && key != "debug" && !key.starts_with("geometry.") {
                    return Err(ConversionError::structural(
                        &root.key(key),
                        format!("{key} is an invalid geometry name (it should start with \"geometry.\")"),
                    ));
                }
            }
            reject_unsupported(map, &["debug"], &root)?;
        }
    }
    Ok(parser)
}

fn geometries(data: &Value, parser: FormatParser) -> Result<Vec<(&Value, JsonPath)>> {
    let root = JsonPath::root();
    match parser {
        FormatParser::Modern => {
            let path = root.key("minecraft:geometry");
            let list = expect_array(&data["minecraft:geometry"], "minecraft:geometry", &path)?;
            Ok(list
                .iter()
                .enumerate()
                .map(|(i, geometry)| (geometry, path.index(i)))
                .collect())
        }
        FormatParser::Legacy => {
            let map = expect_object(data, "model file", &root)?;
            Ok(map
                .iter()
                .filter(|(key, _)| key.starts_with("geometry."))
                .map(|(key, geometry)| (geometry, root.key(key)))
                .collect())
        }
    }
}

fn parse_geometry(geometry: &Value, path: &JsonPath, parser: FormatParser) -> Result<ImportGeometry> {
    let map = expect_object(geometry, "geometry", path)?;
    let mut result = ImportGeometry {
        identifier: String::new(),
        texture_width: 64,
        texture_height: 64,
        visible_bounds_width: 1.0,
        visible_bounds_height: 1.0,
        visible_bounds_offset: [0.0, 0.0, 0.0],
        bones: Vec::new(),
    };

    let (description, description_path, width_key, height_key) = match parser {
        FormatParser::Modern => {
            expect_keys(map, "geometry", &["description", "bones"], &["description", "bones"], path)?;
            let description_path = path.key("description");
            let description = expect_object(&map["description"], "description", &description_path)?;
            expect_keys(
                description,
                "description",
                &["identifier"],
                &[
                    "identifier",
                    "texture_width",
                    "texture_height",
                    "visible_bounds_offset",
                    "visible_bounds_width",
                    "visible_bounds_height",
                ],
                &description_path,
            )?;
            result.identifier = read_string(
                &description["identifier"],
                "identifier",
                &description_path.key("identifier"),
            )?;
            (description, description_path, "texture_width", "texture_height")
        }
        FormatParser::Legacy => {
            expect_keys(
                map,
                "geometry",
                &[],
                &[
                    "debug",
                    "visible_bounds_width",
                    "visible_bounds_height",
                    "visible_bounds_offset",
                    "texturewidth",
                    "textureheight",
                    "cape",
                    "bones",
                ],
                path,
            )?;
            reject_unsupported(map, &["debug", "cape"], path)?;
            result.identifier = path.to_string();
            (map, path.clone(), "texturewidth", "textureheight")
        }
    };

    if let Some(value) = description.get(width_key) {
        result.texture_width = read_texture_size(value, width_key, &description_path.key(width_key))?;
    }
    if let Some(value) = description.get(height_key) {
        result.texture_height = read_texture_size(value, height_key, &description_path.key(height_key))?;
    }
    if let Some(value) = description.get("visible_bounds_offset") {
        result.visible_bounds_offset = read_vector(
            value,
            "visible_bounds_offset",
            &description_path.key("visible_bounds_offset"),
        )?;
    }
    if let Some(value) = description.get("visible_bounds_width") {
        result.visible_bounds_width = read_number(
            value,
            "visible_bounds_width",
            &description_path.key("visible_bounds_width"),
        )?;
    }
    if let Some(value) = description.get("visible_bounds_height") {
        result.visible_bounds_height = read_number(
            value,
            "visible_bounds_height",
            &description_path.key("visible_bounds_height"),
        )?;
    }

    if let Some(bones) = map.get("bones") {
        let bones_path = path.key("bones");
        for (i, bone) in expect_array(bones, "bones", &bones_path)?.iter().enumerate() {
            result.bones.push(parse_bone(bone, &bones_path.index(i), parser)?);
        }
    }
    Ok(result)
}

fn parse_bone(bone: &Value, path: &JsonPath, parser: FormatParser) -> Result<ImportBone> {
    let map = expect_object(bone, "bone", path)?;
    match parser {
        FormatParser::Modern => {
            expect_keys(
                map,
                "bone",
                &["name"],
                &[
                    "name",
                    "parent",
                    "pivot",
                    "rotation",
                    "mirror",
                    "inflate",
                    "debug",
                    "render_group_id",
                    "cubes",
                    "locators",
                    "poly_mesh",
                    "texture_meshes",
                ],
                path,
            )?;
            reject_unsupported(map, &["debug", "render_group_id", "poly_mesh", "texture_meshes"], path)?;
        }
        FormatParser::Legacy => {
            expect_keys(
                map,
                "bone",
                &["name"],
                &[
                    "name",
                    "reset",
                    "neverRender",
                    "parent",
                    "pivot",
                    "rotation",
                    "bind_pose_rotation",
                    "mirror",
                    "inflate",
                    "debug",
                    "render_group_id",
                    "cubes",
                    "locators",
                    "poly_mesh",
                    "texture_meshes",
                ],
                path,
            )?;
            reject_unsupported(
                map,
                &[
                    "reset",
                    "neverRender",
                    "bind_pose_rotation",
                    "debug",
                    "render_group_id",
                    "poly_mesh",
                    "texture_meshes",
                ],
                path,
            )?;
        }
    }

    let mut result = ImportBone {
        name: read_string(&map["name"], "name", &path.key("name"))?,
        parent: None,
        pivot: [0.0; 3],
        rotation: [0.0; 3],
        mirror: false,
        inflate: 0.0,
        cubes: Vec::new(),
        locators: Vec::new(),
    };
    if let Some(value) = map.get("parent") {
        result.parent = Some(read_string(value, "parent", &path.key("parent"))?);
    }
    if let Some(value) = map.get("pivot") {
        result.pivot = read_vector(value, "pivot", &path.key("pivot"))?;
    }
    if let Some(value) = map.get("rotation") {
        result.rotation = read_vector(value, "rotation", &path.key("rotation"))?;
    }
    if let Some(value) = map.get("mirror") {
        result.mirror = read_bool(value, "mirror", &path.key("mirror"))?;
    }
    if let Some(value) = map.get("inflate") {
        result.inflate = read_number(value, "inflate", &path.key("inflate"))?;
    }
    if let Some(cubes) = map.get("cubes") {
        let cubes_path = path.key("cubes");
        for (i, cube) in expect_array(cubes, "cubes", &cubes_path)?.iter().enumerate() {
            result.cubes.push(parse_cube(
                cube,
                &cubes_path.index(i),
                parser,
                result.mirror,
                result.inflate,
            )?);
        }
    }
    if let Some(locators) = map.get("locators") {
        let locators_path = path.key("locators");
        for (name, locator) in expect_object(locators, "locators", &locators_path)? {
            result
                .locators
                .push(parse_locator(name, locator, &locators_path.key(name), parser)?);
        }
    }
    Ok(result)
}

fn parse_cube(
    cube: &Value,
    path: &JsonPath,
    parser: FormatParser,
    default_mirror: bool,
    default_inflate: f64,
) -> Result<ImportCube> {
    let map = expect_object(cube, "cube", path)?;
    let accepted: &[&str] = match parser {
        FormatParser::Modern => &["mirror", "inflate", "pivot", "rotation", "origin", "size", "uv"],
        FormatParser::Legacy => &["origin", "size", "uv", "inflate", "mirror"],
    };
    expect_keys(map, "cube", &[], accepted, path)?;

    let mut result = ImportCube {
        origin: [0.0; 3],
        size: [0.0; 3],
        rotation: [0.0; 3],
        pivot: [0.0; 3],
        inflate: default_inflate,
        mirror: default_mirror,
        uv: CubeUv::Default { uv: [0.0, 0.0] },
    };
    if let Some(value) = map.get("origin") {
        result.origin = read_vector(value, "origin", &path.key("origin"))?;
    }
    if let Some(value) = map.get("size") {
        result.size = read_vector(value, "size", &path.key("size"))?;
    }
    if let Some(value) = map.get("rotation") {
        result.rotation = read_vector(value, "rotation", &path.key("rotation"))?;
    }
    if let Some(value) = map.get("pivot") {
        result.pivot = read_vector(value, "pivot", &path.key("pivot"))?;
    }
    if let Some(value) = map.get("inflate") {
        result.inflate = read_number(value, "inflate", &path.key("inflate"))?;
    }
    if let Some(value) = map.get("mirror") {
        result.mirror = read_bool(value, "mirror", &path.key("mirror"))?;
    }
    if let Some(value) = map.get("uv") {
        let uv_path = path.key("uv");
        result.uv = match (value, parser) {
            (Value::Array(_), _) => CubeUv::Default {
                uv: read_vector(value, "uv", &uv_path)?,
            },
            (Value::Object(faces), FormatParser::Modern) => {
                CubeUv::PerFace(parse_face_uvs(faces, &uv_path, result.size)?)
            }
            _ => {
                return Err(ConversionError::structural(
                    &uv_path,
                    "uv is not a list or a per-face object",
                ));
            }
        };
    }
    Ok(result)
}

fn parse_face_uvs(
    faces: &Map<String, Value>,
    path: &JsonPath,
    size: [f64; 3],
) -> Result<Vec<(Face, FaceRect)>> {
    let keys: Vec<&str> = Face::ALL.iter().map(|face| face.key()).collect();
    expect_keys(faces, "uv", &[], &keys, path)?;
    let [width, height, depth] = size;
    let mut result = Vec::new();
    for face in Face::ALL {
        let Some(entry) = faces.get(face.key()) else {
            continue;
        };
        let face_path = path.key(face.key());
        let entry = expect_object(entry, face.key(), &face_path)?;
        expect_keys(entry, "uv face", &["uv"], &["uv", "uv_size", "material_instance"], &face_path)?;
        let uv = read_vector(&entry["uv"], "uv", &face_path.key("uv"))?;
        let uv_size = match entry.get("uv_size") {
            Some(value) => read_vector(value, "uv_size", &face_path.key("uv_size"))?,
            None => match face {
                Face::North | Face::South => [width, height],
                Face::East | Face::West => [depth, height],
                Face::Up | Face::Down => [width, depth],
            },
        };
        if let Some(value) = entry.get("material_instance") {
            read_string(value, "material_instance", &face_path.key("material_instance"))?;
        }
        result.push((face, FaceRect::new(uv, uv_size)));
    }
    Ok(result)
}

fn parse_locator(name: &str, locator: &Value, path: &JsonPath, parser: FormatParser) -> Result<ImportLocator> {
    match (locator, parser) {
        (Value::Array(_), _) => Ok(ImportLocator {
            name: name.to_string(),
            offset: read_vector(locator, "locator", path)?,
            rotation: [0.0; 3],
        }),
        (Value::Object(map), FormatParser::Modern) => {
            expect_keys(map, "locator", &["offset"], &["offset", "rotation", "ignore_inherited_scale"], path)?;
            let rotation = match map.get("rotation") {
                Some(value) => read_vector(value, "rotation", &path.key("rotation"))?,
                None => [0.0; 3],
            };
            if let Some(value) = map.get("ignore_inherited_scale") {
                read_bool(value, "ignore_inherited_scale", &path.key("ignore_inherited_scale"))?;
            }
            Ok(ImportLocator {
                name: name.to_string(),
                offset: read_vector(&map["offset"], "offset", &path.key("offset"))?,
                rotation,
            })
        }
        _ => Err(ConversionError::structural(path, "locator is not a list or an object")),
    }
}

// ─── Host building ──────────────────────────────────────────────────────────

/// Instruction to create a bone (an empty carrying the bone marker).
#[derive(Debug, Clone, PartialEq)]
pub struct BoneBuild {
    pub name: String,
    pub parent: Option<ObjectId>,
    pub world: Matrix4<f64>,
}

/// Instruction to create a cuboid mesh.
///
/// `min`/`max` are the mesh bounds in the object's local space, inflate
/// included. `faces` are engine-pixel rectangles for a texture of
/// `texture_size`.
#[derive(Debug, Clone, PartialEq)]
pub struct CubeBuild {
    pub name: String,
    pub parent: ObjectId,
    pub world: Matrix4<f64>,
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
    pub faces: [FaceRect; 6],
    pub texture_size: [f64; 2],
    pub mirror: bool,
    pub inflate: f64,
    pub uv: Option<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocatorBuild {
    pub name: String,
    pub parent: ObjectId,
    pub world: Matrix4<f64>,
}

/// Host side of the importer: creates objects and returns their identities.
pub trait HostBuilder {
    fn build_bone(&mut self, bone: &BoneBuild) -> ObjectId;
    fn build_cube(&mut self, cube: &CubeBuild) -> ObjectId;
    fn build_locator(&mut self, locator: &LocatorBuild) -> ObjectId;
}

/// Orders bones so that every parent comes before its children.
///
/// # Errors
/// [`ConversionError::DanglingParent`] for a parent name missing from the
/// geometry, [`ConversionError::ParentCycle`] for looping links and
/// [`ConversionError::NameConflict`] for duplicated bone names.
pub fn sort_bones(bones: &[ImportBone]) -> Result<Vec<&ImportBone>> {
    let mut by_name: HashMap<&str, &ImportBone> = HashMap::new();
    for bone in bones {
        if by_name.insert(bone.name.as_str(), bone).is_some() {
            return Err(ConversionError::NameConflict {
                name: bone.name.clone(),
            });
        }
    }
    for bone in bones {
        if let Some(parent) = &bone.parent {
            if !by_name.contains_key(parent.as_str()) {
                return Err(ConversionError::DanglingParent {
                    bone: bone.name.clone(),
                    parent: parent.clone(),
                });
            }
        }
    }

    let mut ordered = Vec::with_capacity(bones.len());
    let mut placed: HashSet<&str> = HashSet::new();
    while ordered.len() < bones.len() {
        let before = ordered.len();
        for bone in bones {
            if placed.contains(bone.name.as_str()) {
                continue;
            }
            let ready = bone
                .parent
                .as_deref()
                .is_none_or(|parent| placed.contains(parent));
            if ready {
                placed.insert(bone.name.as_str());
                ordered.push(bone);
            }
        }
        if ordered.len() == before {
            let stuck = bones
                .iter()
                .find(|bone| !placed.contains(bone.name.as_str()))
                .map(|bone| bone.name.clone())
                .unwrap_or_default();
            return Err(ConversionError::ParentCycle { bone: stuck });
        }
    }
    Ok(ordered)
}

fn host_point(mc: &[f64; 3]) -> Vector3<f64> {
    swap_yz(&Vector3::from(*mc)) / MINECRAFT_SCALE_FACTOR
}

fn rotation_about(pivot: &Vector3<f64>, mc_rotation: &[f64; 3]) -> Matrix4<f64> {
    Matrix4::new_translation(pivot)
        * rotation_from_mc(&Vector3::from(*mc_rotation)).to_homogeneous()
        * Matrix4::new_translation(&-pivot)
}

/// Creates host objects for every bone, cube and locator of `geometry`.
///
/// Each bone's rotation is applied around its own pivot on top of all its
/// ancestors' rotations. Nothing is built when the bone hierarchy is invalid.
pub fn build_geometry(geometry: &ImportGeometry, host: &mut impl HostBuilder) -> Result<Vec<ObjectId>> {
    let ordered = sort_bones(&geometry.bones)?;
    let texture_size = [
        f64::from(geometry.texture_width),
        f64::from(geometry.texture_height),
    ];

    let mut deformations: HashMap<&str, Matrix4<f64>> = HashMap::new();
    let mut ids: HashMap<&str, ObjectId> = HashMap::new();
    let mut created = Vec::new();
    for bone in ordered {
        let parent_deformation = bone
            .parent
            .as_deref()
            .and_then(|parent| deformations.get(parent))
            .copied()
            .unwrap_or_else(Matrix4::identity);
        let pivot = host_point(&bone.pivot);
        let deformation = parent_deformation * rotation_about(&pivot, &bone.rotation);

        let id = host.build_bone(&BoneBuild {
            name: bone.name.clone(),
            parent: bone.parent.as_deref().and_then(|parent| ids.get(parent)).cloned(),
            world: deformation * Matrix4::new_translation(&pivot),
        });
        debug!("built bone {}", bone.name);
        created.push(id.clone());

        for (i, cube) in bone.cubes.iter().enumerate() {
            let cube_pivot = host_point(&cube.pivot);
            let world = deformation
                * Matrix4::new_translation(&cube_pivot)
                * rotation_from_mc(&Vector3::from(cube.rotation)).to_homogeneous();
            let origin = host_point(&cube.origin);
            let far_corner = host_point(&[
                cube.origin[0] + cube.size[0],
                cube.origin[1] + cube.size[1],
                cube.origin[2] + cube.size[2],
            ]);
            let inflate = Vector3::repeat(cube.inflate / MINECRAFT_SCALE_FACTOR);
            let min = origin.inf(&far_corner) - cube_pivot - inflate;
            let max = origin.sup(&far_corner) - cube_pivot + inflate;
            let uv = match cube.uv {
                CubeUv::Default { uv } => Some(uv),
                CubeUv::PerFace(_) => None,
            };
            created.push(host.build_cube(&CubeBuild {
                name: format!("{}_cube{}", bone.name, i),
                parent: id.clone(),
                world,
                min,
                max,
                faces: cube.face_rects(),
                texture_size,
                mirror: cube.mirror,
                inflate: cube.inflate,
                uv,
            }));
        }

        for locator in &bone.locators {
            let world = deformation
                * Matrix4::new_translation(&host_point(&locator.offset))
                * rotation_from_mc(&Vector3::from(locator.rotation)).to_homogeneous();
            created.push(host.build_locator(&LocatorBuild {
                name: locator.name.clone(),
                parent: id.clone(),
                world,
            }));
        }

        deformations.insert(bone.name.as_str(), deformation);
        ids.insert(bone.name.as_str(), id);
    }
    info!("built {} host objects for {}", created.len(), geometry.identifier);
    Ok(created)
}
