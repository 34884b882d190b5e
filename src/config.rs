use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::pose::RowMajor4;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub calibration: CalibrationConfig,
    pub detector: DetectorConfig,
    pub window: WindowConfig,
    pub projection: ProjectionConfig,
    pub background: BackgroundConfig,
    pub axis_correction: AxisCorrectionConfig,
    pub preview: PreviewConfig,
    /// Role label to model file.
    pub models: BTreeMap<String, ModelAssetConfig>,
    /// Role label to image file, shown as a textured square on the marker.
    pub textures: BTreeMap<String, PathBuf>,
    pub markers: Vec<MarkerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: i32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    /// Capture on a worker thread and hand over only the newest frame.
    pub threaded: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: None,
            height: None,
            fps: None,
            threaded: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// `.npz` with `mtx` and `dist`, or `.json` with `intrinsic_matrix` and
    /// `dist_coeffs`.
    pub path: PathBuf,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("Camera.npz"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// ArUco dictionary (e.g. "DICT_5X5_250")
    pub dictionary: String,
    /// Printed marker side length. Translations come out in the same unit.
    pub marker_length: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            dictionary: "DICT_5X5_250".to_string(),
            marker_length: 100.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "markerlay".to_string(),
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            fov_y_degrees: 45.0,
            near: 1.0,
            far: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Distance of the video quad in front of the eye.
    pub depth: f32,
    pub half_width: f32,
    pub half_height: f32,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            depth: 10.0,
            half_width: 6.0,
            half_height: 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AxisCorrectionConfig {
    /// Row-major 4x4 of 1 / -1.
    pub mask: RowMajor4,
}

impl Default for AxisCorrectionConfig {
    fn default() -> Self {
        Self {
            mask: *crate::pose::SignMask::TUNED.rows(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub enabled: bool,
    pub window_name: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_name: "frame".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelAssetConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub swap_yz: bool,
    #[serde(default = "default_model_scale")]
    pub scale: f32,
}

fn default_model_scale() -> f32 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkerConfig {
    pub id: i32,
    /// Divisors for the marker's translation, per axis.
    pub axis_scale: [f64; 3],
    /// Show one model for as long as the marker is visible.
    #[serde(default)]
    pub model: Option<String>,
    /// Or cycle through several models.
    #[serde(default)]
    pub sequence: Option<Vec<StageConfig>>,
    #[serde(default = "default_repeat")]
    pub repeat: bool,
    /// Restart the sequence when the marker has been gone this long.
    #[serde(default = "default_reset_after_seconds")]
    pub reset_after_seconds: f64,
}

fn default_repeat() -> bool {
    true
}

fn default_reset_after_seconds() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    pub model: String,
    pub seconds: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let model = |path: &str| ModelAssetConfig {
            path: PathBuf::from(path),
            swap_yz: true,
            scale: 1.0,
        };

        let models = BTreeMap::from([
            ("stone-high".to_string(), model("assets/models/pileofstone_high.glb")),
            ("pitcher-low".to_string(), model("assets/models/waterpitcher_low.glb")),
            ("pitcher-medium".to_string(), model("assets/models/waterpitcher_medium.glb")),
        ]);

        let markers = vec![
            MarkerConfig {
                id: 0,
                axis_scale: [200.0, 300.0, 130.0],
                model: Some("stone-high".to_string()),
                sequence: None,
                repeat: true,
                reset_after_seconds: default_reset_after_seconds(),
            },
            MarkerConfig {
                id: 2,
                axis_scale: [160.0, 372.0, 140.0],
                model: None,
                sequence: Some(vec![
                    StageConfig {
                        model: "pitcher-low".to_string(),
                        seconds: 3.0,
                    },
                    StageConfig {
                        model: "pitcher-medium".to_string(),
                        seconds: 3.0,
                    },
                ]),
                repeat: true,
                reset_after_seconds: default_reset_after_seconds(),
            },
        ];

        Self {
            camera: CameraConfig::default(),
            calibration: CalibrationConfig::default(),
            detector: DetectorConfig::default(),
            window: WindowConfig::default(),
            projection: ProjectionConfig::default(),
            background: BackgroundConfig::default(),
            axis_correction: AxisCorrectionConfig::default(),
            preview: PreviewConfig::default(),
            models,
            textures: BTreeMap::new(),
            markers,
        }
    }
}

impl AppConfig {
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    /// Missing file means defaults; a file that exists but does not parse is
    /// still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let config = Self::load(path)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml("", Path::new("empty.toml")).unwrap();
        assert_eq!(config.detector.dictionary, "DICT_5X5_250");
        assert_eq!(config.projection, ProjectionConfig::default());
        assert_eq!(config.markers.len(), 2);
        assert_eq!(config.axis_correction.mask[1], [-1.0; 4]);
    }

    #[test]
    fn parses_markers_and_assets() {
        let toml = r#"
            [camera]
            index = 1
            threaded = false

            [calibration]
            path = "rig/Camera.json"

            [models.stone]
            path = "stone.glb"
            swap_yz = true

            [textures]
            logo = "logo.png"

            [[markers]]
            id = 0
            axis_scale = [160.0, 372.0, 140.0]
            model = "stone"

            [[markers]]
            id = 6
            axis_scale = [250.0, 250.0, 100.0]
            sequence = [
                { model = "stone", seconds = 1.5 },
                { model = "logo", seconds = 2.0 },
            ]
            repeat = false
        "#;

        let config = AppConfig::from_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.camera.index, 1);
        assert!(!config.camera.threaded);
        assert_eq!(config.calibration.path, PathBuf::from("rig/Camera.json"));
        assert!(config.models["stone"].swap_yz);
        assert_eq!(config.models["stone"].scale, 1.0);
        assert_eq!(config.textures["logo"], PathBuf::from("logo.png"));

        assert_eq!(config.markers.len(), 2);
        assert_eq!(config.markers[0].model.as_deref(), Some("stone"));
        let sequence = config.markers[1].sequence.as_ref().unwrap();
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence[1].seconds, 2.0);
        assert!(!config.markers[1].repeat);
        assert_eq!(config.markers[1].reset_after_seconds, 1.0);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let err = AppConfig::from_toml("[camera\nindex = 1", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn bundled_config_matches_defaults() {
        let bundled = AppConfig::from_toml(
            include_str!("../markerlay.toml"),
            Path::new("markerlay.toml"),
        )
        .unwrap();
        let defaults = AppConfig::default();

        assert_eq!(bundled.axis_correction.mask, defaults.axis_correction.mask);
        assert_eq!(bundled.background, defaults.background);
        assert!(bundled.models.keys().eq(defaults.models.keys()));
        assert_eq!(bundled.markers.len(), defaults.markers.len());
        assert_eq!(bundled.markers[1].axis_scale, defaults.markers[1].axis_scale);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.window.width, 640);
    }
}
