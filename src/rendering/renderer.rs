use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use wgpu::CommandEncoderDescriptor;
use winit::{dpi::PhysicalSize, window::Window};

use crate::{
    assets::{ModelId, ModelStore},
    compositor::DrawList,
    rendering::{
        instance::Instance,
        passes::{
            background_pass::{BackgroundPass, BackgroundPassTextureViews},
            model_pass::{ModelPass, ModelPassTextureViews},
            pass::Pass,
        },
        projection::{Projection, ProjectionUniform},
        render_common::RenderCommon,
        render_model::{render_model_instances, RenderModel},
        shader_loader::{PipelineCacheBuilder, ShaderLoader},
        texture::{DepthTexture, FrameTexture},
    },
};

pub struct Renderer {
    pub window: Arc<Window>,
    pub size: PhysicalSize<u32>,

    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,

    common: Arc<RenderCommon>,
    depth_texture: DepthTexture,
    frame_texture: Option<FrameTexture>,
    render_models: HashMap<ModelId, RenderModel>,
    projection: Projection,

    shader_loader: ShaderLoader,

    background_pass: BackgroundPass,
    model_pass: ModelPass,
}

impl Renderer {
    pub async fn new(window: Arc<Window>, projection: Projection) -> anyhow::Result<Renderer> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance
            .create_surface(window.clone())
            .context("Failed to create surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("No suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                label: None,
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .context("Failed to create GPU device")?;

        log::info!("Using adapter {}", adapter.get_info().name);

        let common = Arc::new(RenderCommon::new(&device, &adapter, &surface, size, &projection)?);

        let depth_texture = DepthTexture::new(&device, size, "Depth Texture");

        let mut cache_builder = PipelineCacheBuilder::new();

        let background_pass = BackgroundPass::create(&device, common.clone(), &mut cache_builder)?;
        let model_pass = ModelPass::create(&device, common.clone(), &mut cache_builder)?;

        let shader_loader = ShaderLoader::new(device.clone(), cache_builder)?;

        Ok(Self {
            window,
            size,
            surface,
            device,
            queue,
            common,
            depth_texture,
            frame_texture: None,
            render_models: HashMap::new(),
            projection,
            shader_loader,
            background_pass,
            model_pass,
        })
    }

    /// Uploads every model in the store. Called once before the first frame.
    pub fn load_models(&mut self, models: &ModelStore) {
        for (id, model) in models.iter() {
            let render_model =
                RenderModel::from_model(&self.device, &self.queue, &self.common, model);
            log::debug!(
                "Uploaded model {} with {} primitives",
                model.name,
                model.primitives.len()
            );
            self.render_models.insert(id, render_model);
        }
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }

        self.size = new_size;
        {
            let mut config = self
                .common
                .output_surface_config
                .write()
                .unwrap_or_else(|e| e.into_inner());
            config.width = new_size.width;
            config.height = new_size.height;
            self.surface.configure(&self.device, &config);
        }
        self.depth_texture.resize(&self.device, new_size);

        ProjectionUniform::new(&self.projection, new_size)
            .update_buffer(&self.queue, &self.common.projection_buffer);
    }

    pub fn render(&mut self, draw_list: &DrawList) -> Result<(), wgpu::SurfaceError> {
        self.shader_loader.load_pending_shaders();

        if let Some(background) = &draw_list.background {
            let up_to_date = self
                .frame_texture
                .as_ref()
                .is_some_and(|texture| texture.update(&self.queue, background));
            if !up_to_date {
                self.frame_texture = Some(FrameTexture::new(
                    &self.device,
                    &self.queue,
                    &self.common.texture_bind_group_layout,
                    &self.common.sampler,
                    background,
                ));
            }
        }
        self.background_pass.set_quad(&self.queue, &draw_list.quad);

        for render_model in self.render_models.values_mut() {
            render_model.instances.clear();
        }

        match draw_list.resolve() {
            Ok(draws) => {
                for draw in draws {
                    match self.render_models.get_mut(&draw.model) {
                        Some(render_model) => render_model.add_instance(Instance {
                            model_view: draw.model_view,
                        }),
                        None => log::warn!(
                            "Marker {} refers to a model that was never uploaded",
                            draw.marker_id
                        ),
                    }
                }
            }
            Err(err) => log::warn!("Discarding model draws: {}", err),
        }

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        let pipeline_cache = &self.shader_loader.cache;

        let frame_texture = self.frame_texture.as_ref();
        let quad_vertices = self.background_pass.vertex_buffer();
        self.background_pass.render(
            &BackgroundPassTextureViews {
                color: view.clone(),
            },
            &mut encoder,
            pipeline_cache,
            |render_pass| {
                if let Some(frame_texture) = frame_texture {
                    BackgroundPass::draw_frame(
                        render_pass,
                        quad_vertices,
                        frame_texture.bind_group(),
                    );
                }
            },
        );

        let render_models = &self.render_models;
        let queue = &self.queue;
        self.model_pass.render(
            &ModelPassTextureViews {
                color: view.clone(),
                depth: self.depth_texture.view().clone(),
            },
            &mut encoder,
            pipeline_cache,
            |render_pass| {
                for render_model in render_models.values() {
                    if !render_model.instances.should_render() {
                        continue;
                    }

                    render_model_instances(render_pass, queue, render_model);
                }
            },
        );

        self.queue.submit([encoder.finish()]);
        self.window.pre_present_notify();
        output.present();

        Ok(())
    }
}
