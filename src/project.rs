use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::animation::AnimationExportOptions;
use crate::model::ModelExportOptions;
use crate::texture::UvGroup;
use crate::uv::mapping::UvMappingOptions;

/// Persisted project settings used by CLI workflows.
///
/// Missing sections fall back to their defaults when loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub model: ModelExportOptions,
    pub animation: AnimationExportOptions,
    pub uv: UvMappingOptions,
    pub uv_groups: Vec<UvGroup>,
}

/// Save project settings to a JSON file.
pub fn save_project_settings(path: &Path, settings: &ProjectSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings).context("failed to serialize project settings as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save project settings: {}", path.display()))?;
    Ok(())
}

/// Load project settings from a JSON file.
pub fn load_project_settings(path: &Path) -> Result<ProjectSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load project settings: {}", path.display()))?;
    let settings: ProjectSettings =
        serde_json::from_str(&content).context("failed to parse project settings JSON")?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::{Color, MaskKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn given_default_settings_when_serialize_then_json_contains_texture_width() {
        let settings = ProjectSettings::default();
        let json = serde_json::to_string(&settings).expect("serialize settings");
        assert!(json.contains("texture_width"));
    }

    #[test]
    fn given_settings_with_uv_group_when_saved_and_loaded_then_they_match() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("project.json");
        let mut settings = ProjectSettings::default();
        settings.model.model_name = "golem".to_string();
        settings.animation.optimize = Some(0.05);
        settings.uv_groups.push(UvGroup {
            name: "stone".to_string(),
            side1: vec![
                MaskKind::Color {
                    color: Color::new(0.5, 0.5, 0.5),
                }
                .into(),
            ],
            ..UvGroup::default()
        });

        save_project_settings(&path, &settings).expect("save settings");
        let loaded = load_project_settings(&path).expect("load settings");

        assert_eq!(loaded, settings);
    }

    #[test]
    fn given_partial_file_when_loading_then_missing_sections_use_defaults() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("project.json");
        fs::write(&path, r#"{"uv": {"texture_width": 128, "texture_height": null, "allow_expanding": false, "read_existing_uvs": true, "resolution": 2}}"#)
            .expect("write settings");

        let loaded = load_project_settings(&path).expect("load settings");

        assert_eq!(loaded.uv.texture_width, 128);
        assert_eq!(loaded.model, ModelExportOptions::default());
        assert!(loaded.uv_groups.is_empty());
    }

    #[test]
    fn given_section_with_missing_keys_when_loading_then_those_keys_use_defaults() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("project.json");
        fs::write(
            &path,
            r#"{"uv": {"texture_width": 32}, "animation": {"name": "walk"}, "model": {"model_name": "golem"}}"#,
        )
        .expect("write settings");

        let loaded = load_project_settings(&path).expect("load settings");

        assert_eq!(
            loaded.uv,
            UvMappingOptions {
                texture_width: 32,
                ..UvMappingOptions::default()
            }
        );
        assert_eq!(loaded.animation.name, "walk");
        assert_eq!(loaded.animation.fps, 24.0);
        assert_eq!(loaded.model.model_name, "golem");
        assert_eq!(loaded.model.texture_width, 64);
    }

    #[test]
    fn given_missing_file_when_loading_then_error_names_the_path() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("missing.json");

        let error = load_project_settings(&path).expect_err("file does not exist");

        assert!(error.to_string().contains("missing.json"));
    }
}
