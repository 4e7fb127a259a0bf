use std::{env, fs, path::Path, process};

use anyhow::{Context, Result, bail};
use serde_json::Value;

use bedrock_rig::animation::optimize::optimize_animation_json;
use bedrock_rig::model::ModelExportOptions;
use bedrock_rig::model::export::export_model;
use bedrock_rig::model::import::{ImportGeometry, assert_is_model, build_geometry, load_model};
use bedrock_rig::project::{ProjectSettings, load_project_settings};
use bedrock_rig::scene::build_scene_graph;
use bedrock_rig::scene::memory::MemoryScene;
use bedrock_rig::uv::mapping::{paint_template, set_uvs};

const USAGE: &str = "\
Usage:
  bedrock-rig check <model.json> [geometry]
  bedrock-rig roundtrip <model.json> <out.json> [settings.json]
  bedrock-rig optimize <animation.json> <out.json> <error_margin> [animation_name]
  bedrock-rig uv-template <model.json> <out.png> [settings.json]";

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn usage() -> ! {
    eprintln!("{USAGE}");
    process::exit(2);
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        usage();
    };

    match (command.as_str(), rest) {
        ("check", [model]) => check(Path::new(model), ""),
        ("check", [model, geometry]) => check(Path::new(model), geometry),
        ("roundtrip", [model, output]) => roundtrip(Path::new(model), Path::new(output), None),
        ("roundtrip", [model, output, settings]) => {
            roundtrip(Path::new(model), Path::new(output), Some(Path::new(settings)))
        }
        ("optimize", [input, output, margin]) => optimize(Path::new(input), Path::new(output), margin, None),
        ("optimize", [input, output, margin, name]) => {
            optimize(Path::new(input), Path::new(output), margin, Some(name.as_str()))
        }
        ("uv-template", [model, output]) => uv_template(Path::new(model), Path::new(output), None),
        ("uv-template", [model, output, settings]) => {
            uv_template(Path::new(model), Path::new(output), Some(Path::new(settings)))
        }
        _ => usage(),
    }
}

// ─── Commands ───────────────────────────────────────────────────────────────

fn check(model: &Path, geometry: &str) -> Result<()> {
    let data = read_json(model)?;
    assert_is_model(&data).with_context(|| format!("invalid model file: {}", model.display()))?;
    let geometry = load_model(&data, geometry)?;

    let cubes: usize = geometry.bones.iter().map(|bone| bone.cubes.len()).sum();
    let locators: usize = geometry.bones.iter().map(|bone| bone.locators.len()).sum();
    println!("Geometry: {}", geometry.identifier);
    println!(
        "Texture: {}x{}",
        geometry.texture_width, geometry.texture_height
    );
    println!(
        "Bones: {}, Cubes: {}, Locators: {}",
        geometry.bones.len(),
        cubes,
        locators
    );
    Ok(())
}

fn roundtrip(model: &Path, output: &Path, settings: Option<&Path>) -> Result<()> {
    let geometry = load_model(&read_json(model)?, "")?;
    let options = match settings {
        Some(path) => load_project_settings(path)?.model,
        None => export_options_for(&geometry),
    };

    let mut scene = MemoryScene::default();
    build_geometry(&geometry, &mut scene)?;
    let graph = build_scene_graph(&scene)?;
    let export = export_model(&scene, &graph, &options)?;

    write_json(output, &export.json)?;
    for warning in &export.warnings {
        println!("Warning: {warning}");
    }
    println!("Exported geometry.{} to {}", options.model_name, output.display());
    Ok(())
}

fn optimize(input: &Path, output: &Path, margin: &str, animation_name: Option<&str>) -> Result<()> {
    let error_margin: f64 = margin
        .parse()
        .with_context(|| format!("error margin is not a number: {margin}"))?;
    if error_margin.is_nan() || error_margin < 0.0 {
        bail!("error margin must not be negative, got {margin}");
    }

    let mut data = read_json(input)?;
    if !data.get("animations").is_some_and(Value::is_object) {
        bail!("not an animation file: {}", input.display());
    }
    let removed = optimize_animation_json(&mut data, error_margin, animation_name);
    write_json(output, &data)?;

    println!(
        "Removed keyframes: rotation {}, position {}, scale {} (total {})",
        removed.rotation,
        removed.position,
        removed.scale,
        removed.total()
    );
    Ok(())
}

fn uv_template(model: &Path, output: &Path, settings: Option<&Path>) -> Result<()> {
    let settings = match settings {
        Some(path) => load_project_settings(path)?,
        None => ProjectSettings::default(),
    };
    let geometry = load_model(&read_json(model)?, "")?;

    let mut scene = MemoryScene::default();
    build_geometry(&geometry, &mut scene)?;
    let graph = build_scene_graph(&scene)?;
    let layout = set_uvs(&mut scene, &graph, &settings.uv)?;
    let image = paint_template(&layout, &settings.uv_groups, settings.uv.resolution)?;

    image
        .save(output)
        .with_context(|| format!("failed to save template texture: {}", output.display()))?;
    println!(
        "Template: {}x{} texture units, {} cubes, saved to {}",
        layout.width,
        layout.height,
        layout.slots.len(),
        output.display()
    );
    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn export_options_for(geometry: &ImportGeometry) -> ModelExportOptions {
    let name = geometry
        .identifier
        .strip_prefix("geometry.")
        .unwrap_or(&geometry.identifier);
    ModelExportOptions {
        model_name: name.to_string(),
        texture_width: geometry.texture_width,
        texture_height: geometry.texture_height,
        visible_bounds_width: geometry.visible_bounds_width,
        visible_bounds_height: geometry.visible_bounds_height,
        visible_bounds_offset: geometry.visible_bounds_offset,
        ..ModelExportOptions::default()
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse JSON: {}", path.display()))
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("failed to serialize JSON")?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
