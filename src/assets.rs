use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use id_arena::{Arena, Id};

use crate::config::ModelAssetConfig;
use crate::model::{Model, ModelImport};

pub type ModelId = Id<Model>;

#[derive(thiserror::Error, Debug)]
pub enum AssetLoadError {
    #[error("failed to load model '{role}' from {}: {source}", .path.display())]
    Gltf {
        role: String,
        path: PathBuf,
        source: gltf::Error,
    },
    #[error("failed to load image '{role}' from {}: {source}", .path.display())]
    Image {
        role: String,
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("model '{role}' has no triangle primitives")]
    NoPrimitives { role: String },
    #[error("model '{role}' uses unsupported primitive mode {mode:?}")]
    UnsupportedPrimitive {
        role: String,
        mode: gltf::mesh::Mode,
    },
    #[error("model '{role}' primitive {primitive} has no positions")]
    MissingPositions { role: String, primitive: usize },
    #[error("model '{role}' references missing image {image}")]
    MissingImage { role: String, image: usize },
    #[error("model '{role}' has a texture in unsupported format {format:?}")]
    UnsupportedImageFormat {
        role: String,
        format: gltf::image::Format,
    },
    #[error("asset role '{0}' is defined more than once")]
    DuplicateRole(String),
}

/// Every model the overlay can draw, addressed by role label or id.
///
/// Loaded once at startup; models are never mutated afterwards.
#[derive(Default)]
pub struct ModelStore {
    models: Arena<Model>,
    roles: HashMap<String, ModelId>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        role: impl Into<String>,
        model: Model,
    ) -> Result<ModelId, AssetLoadError> {
        let role = role.into();
        if self.roles.contains_key(&role) {
            return Err(AssetLoadError::DuplicateRole(role));
        }

        let id = self.models.alloc(model);
        self.roles.insert(role, id);
        Ok(id)
    }

    pub fn get(&self, id: ModelId) -> Option<&Model> {
        self.models.get(id)
    }

    pub fn by_role(&self, role: &str) -> Option<ModelId> {
        self.roles.get(role).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModelId, &Model)> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.len() == 0
    }

    pub fn load(
        models: &BTreeMap<String, ModelAssetConfig>,
        textures: &BTreeMap<String, PathBuf>,
    ) -> Result<Self, AssetLoadError> {
        let mut store = ModelStore::new();

        for (role, asset) in models {
            let import = ModelImport {
                swap_yz: asset.swap_yz,
                scale: asset.scale,
            };
            let model = load_model(role, &asset.path, &import)?;
            log::info!(
                "Loaded model '{}' from {} ({} primitives, {} vertices)",
                role,
                asset.path.display(),
                model.primitives.len(),
                model.vertex_count()
            );
            store.insert(role.clone(), model)?;
        }

        for (role, path) in textures {
            let model = load_overlay_texture(role, path)?;
            log::info!("Loaded overlay texture '{}' from {}", role, path.display());
            store.insert(role.clone(), model)?;
        }

        Ok(store)
    }
}

pub fn load_model(role: &str, path: &Path, import: &ModelImport) -> Result<Model, AssetLoadError> {
    let (document, buffers, images) = gltf::import(path).map_err(|source| AssetLoadError::Gltf {
        role: role.to_string(),
        path: path.to_path_buf(),
        source,
    })?;

    Model::from_gltf(role, &document, &buffers, &images, import)
}

pub fn load_overlay_texture(role: &str, path: &Path) -> Result<Model, AssetLoadError> {
    let image = image::open(path)
        .map_err(|source| AssetLoadError::Image {
            role: role.to_string(),
            path: path.to_path_buf(),
            source,
        })?
        .to_rgba8();

    Ok(Model::textured_quad(role, image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn quad(name: &str) -> Model {
        Model::textured_quad(name, RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn roles_resolve_to_ids() {
        let mut store = ModelStore::new();
        let a = store.insert("a", quad("a")).unwrap();
        let b = store.insert("b", quad("b")).unwrap();

        assert_ne!(a, b);
        assert_eq!(store.by_role("b"), Some(b));
        assert_eq!(store.get(a).unwrap().name, "a");
        assert_eq!(store.len(), 2);
        assert!(store.by_role("c").is_none());
    }

    #[test]
    fn duplicate_role_is_rejected() {
        let mut store = ModelStore::new();
        store.insert("a", quad("a")).unwrap();
        assert!(matches!(
            store.insert("a", quad("a")),
            Err(AssetLoadError::DuplicateRole(role)) if role == "a"
        ));
    }

    #[test]
    fn missing_model_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let models = BTreeMap::from([(
            "stone".to_string(),
            ModelAssetConfig {
                path: dir.path().join("missing.glb"),
                swap_yz: true,
                scale: 1.0,
            },
        )]);

        let err = ModelStore::load(&models, &BTreeMap::new()).err().unwrap();
        assert!(matches!(err, AssetLoadError::Gltf { role, .. } if role == "stone"));
    }

    #[test]
    fn loads_overlay_texture_from_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.png");
        RgbaImage::from_pixel(8, 4, Rgba([0, 255, 0, 255]))
            .save(&path)
            .unwrap();

        let textures = BTreeMap::from([("logo".to_string(), path)]);
        let store = ModelStore::load(&BTreeMap::new(), &textures).unwrap();

        let id = store.by_role("logo").unwrap();
        let model = store.get(id).unwrap();
        let texture = model.materials[0].base_color_texture.as_ref().unwrap();
        assert_eq!(texture.dimensions(), (8, 4));
    }
}
