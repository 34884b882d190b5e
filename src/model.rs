use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use gltf::buffer;
use image::RgbaImage;
use itertools::izip;

use crate::assets::AssetLoadError;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tex_coords: Vec2,
}

#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub base_color: Vec4,
    pub base_color_texture: Option<RgbaImage>,
}

impl Material {
    pub fn untextured(name: impl Into<String>, base_color: Vec4) -> Self {
        Self {
            name: name.into(),
            base_color,
            base_color_texture: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelPrimitive {
    pub index: usize,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material: usize,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub primitives: Vec<ModelPrimitive>,
    pub materials: Vec<Material>,
}

/// How a model file is placed into marker space on import.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelImport {
    /// Exchange the Y and Z axes of every vertex, for Y-up exports.
    pub swap_yz: bool,
    pub scale: f32,
}

impl Default for ModelImport {
    fn default() -> Self {
        Self {
            swap_yz: false,
            scale: 1.0,
        }
    }
}

impl ModelImport {
    pub fn matrix(&self) -> Mat4 {
        let swap = if self.swap_yz {
            Mat4::from_cols(Vec4::X, Vec4::Z, Vec4::Y, Vec4::W)
        } else {
            Mat4::IDENTITY
        };
        Mat4::from_scale(Vec3::splat(self.scale)) * swap
    }
}

pub type Buffers<'a> = &'a [buffer::Data];

impl Model {
    pub fn from_gltf(
        name: impl Into<String>,
        document: &gltf::Document,
        buffers: Buffers,
        images: &[gltf::image::Data],
        import: &ModelImport,
    ) -> Result<Model, AssetLoadError> {
        let name: String = name.into();

        let mut materials = document
            .materials()
            .map(|material| load_material(&name, &material, images))
            .collect::<Result<Vec<_>, _>>()?;
        let default_material = materials.len();
        materials.push(Material::untextured("Default", Vec4::ONE));

        let mut model = Model {
            name,
            primitives: Vec::new(),
            materials,
        };

        let root = import.matrix();
        match document.default_scene().or_else(|| document.scenes().next()) {
            Some(scene) => {
                for node in scene.nodes() {
                    model.add_node(&node, root, buffers, default_material)?;
                }
            }
            None => {
                for mesh in document.meshes() {
                    model.add_mesh(&mesh, root, buffers, default_material)?;
                }
            }
        }

        if model.primitives.is_empty() {
            return Err(AssetLoadError::NoPrimitives { role: model.name });
        }

        Ok(model)
    }

    fn add_node(
        &mut self,
        node: &gltf::Node,
        parent: Mat4,
        buffers: Buffers,
        default_material: usize,
    ) -> Result<(), AssetLoadError> {
        let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());

        if let Some(mesh) = node.mesh() {
            self.add_mesh(&mesh, world, buffers, default_material)?;
        }

        for child in node.children() {
            self.add_node(&child, world, buffers, default_material)?;
        }

        Ok(())
    }

    fn add_mesh(
        &mut self,
        mesh: &gltf::Mesh,
        world: Mat4,
        buffers: Buffers,
        default_material: usize,
    ) -> Result<(), AssetLoadError> {
        let normal_matrix = Mat3::from_mat4(world).inverse().transpose();

        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                return Err(AssetLoadError::UnsupportedPrimitive {
                    role: self.name.clone(),
                    mode: primitive.mode(),
                });
            }

            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

            let positions: Vec<Vec3> = reader
                .read_positions()
                .ok_or_else(|| AssetLoadError::MissingPositions {
                    role: self.name.clone(),
                    primitive: primitive.index(),
                })?
                .map(Vec3::from)
                .collect();

            let normals: Vec<Vec3> = match reader.read_normals() {
                Some(normals) => normals.map(Vec3::from).collect(),
                None => vec![Vec3::Z; positions.len()],
            };

            let tex_coords: Vec<Vec2> = match reader.read_tex_coords(0) {
                Some(tex_coords) => tex_coords.into_f32().map(Vec2::from).collect(),
                None => vec![Vec2::ZERO; positions.len()],
            };

            let vertices = izip!(positions.iter(), normals.iter(), tex_coords.iter())
                .map(|(position, normal, tex_coords)| Vertex {
                    position: world.transform_point3(*position),
                    normal: (normal_matrix * *normal).normalize_or(Vec3::Z),
                    tex_coords: *tex_coords,
                })
                .collect::<Vec<Vertex>>();

            let indices = match reader.read_indices() {
                Some(indices) => indices.into_u32().collect::<Vec<u32>>(),
                None => (0..vertices.len() as u32).collect(),
            };

            let material = primitive
                .material()
                .index()
                .unwrap_or(default_material);

            self.primitives.push(ModelPrimitive {
                index: self.primitives.len(),
                vertices,
                indices,
                material,
            });
        }

        Ok(())
    }

    /// A flat square in the marker plane showing `image`, one unit from the
    /// centre to each edge.
    pub fn textured_quad(name: impl Into<String>, image: RgbaImage) -> Model {
        let name: String = name.into();
        let vertex = |x: f32, y: f32, u: f32, v: f32| Vertex {
            position: Vec3::new(x, y, 0.0),
            normal: Vec3::Z,
            tex_coords: Vec2::new(u, v),
        };

        let vertices = vec![
            vertex(-1.0, -1.0, 0.0, 1.0),
            vertex(1.0, -1.0, 1.0, 1.0),
            vertex(1.0, 1.0, 1.0, 0.0),
            vertex(-1.0, 1.0, 0.0, 0.0),
        ];

        Model {
            primitives: vec![ModelPrimitive {
                index: 0,
                vertices,
                indices: vec![0, 1, 2, 0, 2, 3],
                material: 0,
            }],
            materials: vec![Material {
                name: format!("{name} texture"),
                base_color: Vec4::ONE,
                base_color_texture: Some(image),
            }],
            name,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.primitives.iter().map(|p| p.vertices.len()).sum()
    }
}

fn load_material(
    model_name: &str,
    material: &gltf::Material,
    images: &[gltf::image::Data],
) -> Result<Material, AssetLoadError> {
    let pbr = material.pbr_metallic_roughness();

    let base_color_texture = match pbr.base_color_texture() {
        Some(info) => {
            let image_index = info.texture().source().index();
            let data = images
                .get(image_index)
                .ok_or_else(|| AssetLoadError::MissingImage {
                    role: model_name.to_string(),
                    image: image_index,
                })?;
            Some(image_data_to_rgba(model_name, data)?)
        }
        None => None,
    };

    Ok(Material {
        name: material.name().unwrap_or("Unnamed material").to_string(),
        base_color: Vec4::from(pbr.base_color_factor()),
        base_color_texture,
    })
}

fn image_data_to_rgba(
    model_name: &str,
    data: &gltf::image::Data,
) -> Result<RgbaImage, AssetLoadError> {
    let pixels = match data.format {
        gltf::image::Format::R8G8B8A8 => data.pixels.clone(),
        gltf::image::Format::R8G8B8 => {
            let mut rgba = Vec::with_capacity(data.pixels.len() / 3 * 4);
            for pixel in data.pixels.chunks(3) {
                rgba.extend_from_slice(pixel);
                rgba.push(255);
            }
            rgba
        }
        format => {
            return Err(AssetLoadError::UnsupportedImageFormat {
                role: model_name.to_string(),
                format,
            })
        }
    };

    RgbaImage::from_raw(data.width, data.height, pixels).ok_or_else(|| {
        AssetLoadError::UnsupportedImageFormat {
            role: model_name.to_string(),
            format: data.format,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // One triangle: (0,0,0), (1,0,0), (0,1,0), u16 indices 0,1,2.
    const TRIANGLE_GLTF: &str = r#"{
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0, "translation": [0.0, 0.0, 2.0] }],
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 1 }, "indices": 0 }] }],
        "buffers": [{
            "byteLength": 44,
            "uri": "data:application/octet-stream;base64,AAABAAIAAAAAAAAAAAAAAAAAAAAAAIA/AAAAAAAAAAAAAAAAAACAPwAAAAA="
        }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 6, "target": 34963 },
            { "buffer": 0, "byteOffset": 8, "byteLength": 36, "target": 34962 }
        ],
        "accessors": [
            { "bufferView": 0, "componentType": 5123, "count": 3, "type": "SCALAR" },
            { "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3",
              "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] }
        ]
    }"#;

    fn import_triangle(import: ModelImport) -> Model {
        let (document, buffers, images) =
            gltf::import_slice(TRIANGLE_GLTF.as_bytes()).expect("valid test glTF");
        Model::from_gltf("triangle", &document, &buffers, &images, &import).unwrap()
    }

    #[test]
    fn loads_triangle_with_node_transform() {
        let model = import_triangle(ModelImport::default());

        assert_eq!(model.primitives.len(), 1);
        let primitive = &model.primitives[0];
        assert_eq!(primitive.indices, vec![0, 1, 2]);
        assert_eq!(primitive.vertices[1].position, Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(primitive.vertices[0].normal, Vec3::Z);
        // No materials in the file, so the default one is used.
        assert_eq!(primitive.material, model.materials.len() - 1);
    }

    #[test]
    fn swap_yz_exchanges_axes_before_scaling() {
        let model = import_triangle(ModelImport {
            swap_yz: true,
            scale: 2.0,
        });

        let vertices = &model.primitives[0].vertices;
        // (0, 1, 0) + node (0, 0, 2) = (0, 1, 2) -> swapped (0, 2, 1) -> scaled (0, 4, 2)
        assert_eq!(vertices[2].position, Vec3::new(0.0, 4.0, 2.0));
    }

    #[test]
    fn textured_quad_has_one_textured_material() {
        let image = RgbaImage::from_pixel(4, 2, image::Rgba([10, 20, 30, 255]));
        let model = Model::textured_quad("overlay", image);

        assert_eq!(model.vertex_count(), 4);
        assert_eq!(model.primitives[0].indices.len(), 6);
        let texture = model.materials[0].base_color_texture.as_ref().unwrap();
        assert_eq!(texture.dimensions(), (4, 2));
    }
}
