use crate::draw::composite::{scaled_size, EraserReach, MAX_SURFACE_PIXELS};
use crate::draw::error::{EngineError, Result as EngineResult};
use crate::draw::model::Rgba;
use crate::draw::tools::ToolBounds;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CANVAS_SETTINGS_FILE_NAME: &str = "canvas_settings.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_logical_width")]
    pub logical_width: u32,
    #[serde(default = "default_logical_height")]
    pub logical_height: u32,
    #[serde(default)]
    pub reference_image_url: Option<String>,
    #[serde(default = "default_reference_opacity")]
    pub reference_opacity: f32,
    #[serde(default = "default_show_reference")]
    pub show_reference: bool,
    /// Paper under the flattened export; `null` keeps it transparent.
    #[serde(default = "default_background_color")]
    pub background_color: Option<Rgba>,
    #[serde(default = "default_color")]
    pub default_color: Rgba,
    #[serde(default = "default_width")]
    pub default_width: f32,
    #[serde(default = "default_min_width")]
    pub min_width: f32,
    #[serde(default = "default_max_width")]
    pub max_width: f32,
    #[serde(default = "default_export_multiplier")]
    pub export_multiplier: f32,
    #[serde(default)]
    pub eraser_reach: EraserReach,
    #[serde(default)]
    pub lesson_title: Option<String>,
    #[serde(default = "default_palette")]
    pub palette: Vec<Rgba>,
}

fn default_logical_width() -> u32 {
    600
}

fn default_logical_height() -> u32 {
    600
}

fn default_reference_opacity() -> f32 {
    0.3
}

fn default_show_reference() -> bool {
    true
}

fn default_background_color() -> Option<Rgba> {
    Some(Rgba::WHITE)
}

fn default_color() -> Rgba {
    Rgba::BLACK
}

fn default_width() -> f32 {
    2.0
}

fn default_min_width() -> f32 {
    1.0
}

fn default_max_width() -> f32 {
    20.0
}

fn default_export_multiplier() -> f32 {
    2.0
}

fn default_palette() -> Vec<Rgba> {
    [
        "#000000", "#444444", "#888888", "#cccccc", "#8b4513", "#d2691e", "#cd853f", "#f4a460",
        "#ff6b6b", "#4ecdc4", "#45b7d1", "#96ceb4",
    ]
    .iter()
    .filter_map(|hex| Rgba::from_hex(hex))
    .collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            logical_width: default_logical_width(),
            logical_height: default_logical_height(),
            reference_image_url: None,
            reference_opacity: default_reference_opacity(),
            show_reference: default_show_reference(),
            background_color: default_background_color(),
            default_color: default_color(),
            default_width: default_width(),
            min_width: default_min_width(),
            max_width: default_max_width(),
            export_multiplier: default_export_multiplier(),
            eraser_reach: EraserReach::default(),
            lesson_title: None,
            palette: default_palette(),
        }
    }
}

impl EngineConfig {
    pub fn logical_size(&self) -> (u32, u32) {
        (self.logical_width, self.logical_height)
    }

    pub fn tool_bounds(&self) -> ToolBounds {
        ToolBounds {
            min_width: self.min_width,
            max_width: self.max_width,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.logical_width == 0 || self.logical_height == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "logical size must be positive, got {}x{}",
                self.logical_width, self.logical_height
            )));
        }
        if !(self.min_width.is_finite() && self.max_width.is_finite())
            || self.min_width <= 0.0
            || self.min_width > self.max_width
        {
            return Err(EngineError::InvalidConfig(format!(
                "brush width bounds must satisfy 0 < min <= max, got {}..{}",
                self.min_width, self.max_width
            )));
        }
        if !self.default_width.is_finite() || self.default_width <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "default width must be positive, got {}",
                self.default_width
            )));
        }
        if !self.export_multiplier.is_finite() || self.export_multiplier <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "export multiplier must be positive, got {}",
                self.export_multiplier
            )));
        }
        for scale in [1.0, self.export_multiplier] {
            if scaled_size(self.logical_size(), scale).is_none() {
                return Err(EngineError::InvalidConfig(format!(
                    "{}x{} at scale {scale} exceeds {MAX_SURFACE_PIXELS} pixels",
                    self.logical_width, self.logical_height
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.reference_opacity) {
            return Err(EngineError::InvalidConfig(format!(
                "reference opacity must be within 0..=1, got {}",
                self.reference_opacity
            )));
        }
        Ok(())
    }
}

/// Missing or blank files yield the defaults.
pub fn load_from_path(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read canvas settings file {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(EngineConfig::default());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("deserialize canvas settings file {}", path.display()))
}

pub fn save_to_path(path: &Path, config: &EngineConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create canvas settings parent folder {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config).context("serialize canvas settings")?;
    std::fs::write(path, json)
        .with_context(|| format!("write canvas settings file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_lesson_page() {
        let config = EngineConfig::default();
        assert_eq!(config.logical_size(), (600, 600));
        assert_eq!(config.reference_opacity, 0.3);
        assert_eq!(config.default_width, 2.0);
        assert_eq!(config.palette.len(), 12);
        assert_eq!(config.eraser_reach, EraserReach::Ink);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r##"{ "logical_width": 320, "default_color": "#FF6B6B", "background_color": null, "eraser_reach": "all_layers" }"##,
        )
        .expect("parse");
        assert_eq!(config.logical_size(), (320, 600));
        assert_eq!(config.default_color, Rgba::rgba(0xff, 0x6b, 0x6b, 255));
        assert_eq!(config.background_color, None);
        assert_eq!(config.eraser_reach, EraserReach::AllLayers);
        assert_eq!(config.max_width, 20.0);
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        let bad = [
            EngineConfig {
                logical_width: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                min_width: 30.0,
                ..EngineConfig::default()
            },
            EngineConfig {
                export_multiplier: 0.0,
                ..EngineConfig::default()
            },
            EngineConfig {
                reference_opacity: 1.5,
                ..EngineConfig::default()
            },
            EngineConfig {
                export_multiplier: 1.0e9,
                ..EngineConfig::default()
            },
            EngineConfig {
                logical_width: 100_000,
                logical_height: 100_000,
                export_multiplier: 1.0,
                ..EngineConfig::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
        }
    }

    #[test]
    fn missing_and_blank_files_load_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(CANVAS_SETTINGS_FILE_NAME);
        assert_eq!(load_from_path(&path).expect("missing"), EngineConfig::default());
        std::fs::write(&path, "  \n").expect("write blank");
        assert_eq!(load_from_path(&path).expect("blank"), EngineConfig::default());
    }

    #[test]
    fn store_roundtrip_serialization() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join(CANVAS_SETTINGS_FILE_NAME);
        let config = EngineConfig {
            lesson_title: Some("Still Life".into()),
            reference_image_url: Some("https://example.com/pear.png".into()),
            ..EngineConfig::default()
        };
        save_to_path(&path, &config).expect("save");
        assert_eq!(load_from_path(&path).expect("load"), config);
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(CANVAS_SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").expect("write");
        let err = load_from_path(&path).expect_err("malformed");
        assert!(format!("{err:#}").contains(CANVAS_SETTINGS_FILE_NAME));
    }
}
