use anyhow::Context;

use crate::{
    assets::ModelStore,
    calibration::{self, CameraIntrinsics},
    compositor::{BackgroundQuad, Compositor},
    config::AppConfig,
    pose::{PoseConverter, SignMask},
    registry::SceneRegistry,
};

/// Everything loaded once at startup and shared read-only by the frame loop.
pub struct ArContext {
    pub intrinsics: CameraIntrinsics,
    pub models: ModelStore,
    pub registry: SceneRegistry,
    pub converter: PoseConverter,
    pub quad: BackgroundQuad,
}

impl ArContext {
    pub fn load(config: &AppConfig) -> anyhow::Result<Self> {
        let intrinsics = calibration::load(&config.calibration.path).with_context(|| {
            format!(
                "Failed to load camera calibration from {}",
                config.calibration.path.display()
            )
        })?;

        Self::with_intrinsics(config, intrinsics)
    }

    /// Same as [`ArContext::load`] with calibration supplied by the caller.
    pub fn with_intrinsics(
        config: &AppConfig,
        intrinsics: CameraIntrinsics,
    ) -> anyhow::Result<Self> {
        let mask =
            SignMask::new(config.axis_correction.mask).context("Invalid axis correction mask")?;

        let models = ModelStore::load(&config.models, &config.textures)
            .context("Failed to load models")?;

        let registry = SceneRegistry::from_config(&config.markers, &models)
            .context("Failed to register markers")?;
        let mut ids: Vec<i32> = registry.ids().collect();
        ids.sort_unstable();
        log::info!("Registered markers {:?}", ids);

        Ok(Self {
            intrinsics,
            models,
            registry,
            converter: PoseConverter::new(mask),
            quad: BackgroundQuad::from(config.background),
        })
    }

    pub fn compositor(&self) -> Compositor {
        Compositor::new(self.converter.clone(), self.quad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarkerConfig;
    use image::{Rgba, RgbaImage};
    use std::collections::BTreeMap;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(
            [[800.0, 0.0, 320.0], [0.0, 800.0, 240.0], [0.0, 0.0, 1.0]],
            vec![0.0; 5],
        )
        .unwrap()
    }

    #[test]
    fn builds_from_texture_only_config() {
        let dir = tempfile::tempdir().unwrap();
        let logo = dir.path().join("logo.png");
        RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])).save(&logo).unwrap();

        let config = AppConfig {
            models: BTreeMap::new(),
            textures: BTreeMap::from([("logo".to_string(), logo)]),
            markers: vec![MarkerConfig {
                id: 6,
                axis_scale: [250.0, 250.0, 100.0],
                model: Some("logo".to_string()),
                sequence: None,
                repeat: true,
                reset_after_seconds: 1.0,
            }],
            ..AppConfig::default()
        };

        let context = ArContext::with_intrinsics(&config, intrinsics()).unwrap();
        assert_eq!(context.models.len(), 1);
        assert!(context.registry.get(6).is_some());
        assert_eq!(context.quad, BackgroundQuad::default());
    }

    #[test]
    fn bad_mask_is_rejected() {
        let mut config = AppConfig {
            models: BTreeMap::new(),
            markers: vec![],
            ..AppConfig::default()
        };
        config.axis_correction.mask[0][0] = 2.0;

        assert!(ArContext::with_intrinsics(&config, intrinsics()).is_err());
    }
}
