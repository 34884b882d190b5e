use std::{mem::offset_of, sync::Arc};

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use wgpu::{
    util::DeviceExt, Device, MultisampleState, PipelineCompilationOptions, RenderPass,
    RenderPassDescriptor, ShaderSource,
};

use crate::{
    compositor::BackgroundQuad,
    rendering::{
        passes::pass::Pass,
        render_common::RenderCommon,
        shader_loader::{PipelineCache, PipelineCacheBuilder, PipelineId, ShaderDefinition},
    },
};

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct BackgroundVertex {
    pub position: Vec3,
    pub tex_coords: Vec2,
}

impl BackgroundVertex {
    /// Two triangles covering the quad.
    pub fn quad(quad: &BackgroundQuad) -> [BackgroundVertex; 6] {
        let corners = quad.corners().map(|(position, tex_coords)| BackgroundVertex {
            position,
            tex_coords,
        });
        [
            corners[0], corners[1], corners[2], corners[0], corners[2], corners[3],
        ]
    }
}

const BACKGROUND_VBL: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: std::mem::size_of::<BackgroundVertex>() as wgpu::BufferAddress,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[
        wgpu::VertexAttribute {
            offset: offset_of!(BackgroundVertex, position) as wgpu::BufferAddress,
            shader_location: 0,
            format: wgpu::VertexFormat::Float32x3,
        },
        wgpu::VertexAttribute {
            offset: offset_of!(BackgroundVertex, tex_coords) as wgpu::BufferAddress,
            shader_location: 1,
            format: wgpu::VertexFormat::Float32x2,
        },
    ],
};

const BACKGROUND_SHADER: ShaderDefinition = ShaderDefinition {
    name: "Camera Background",
    path: "background.wgsl",
    builtin: include_str!("../../../assets/shaders/background.wgsl"),
};

pub struct BackgroundPass {
    pipeline_id: PipelineId,
    vertex_buffer: wgpu::Buffer,
    quad: BackgroundQuad,
    common: Arc<RenderCommon>,
}

pub struct BackgroundPassTextureViews {
    pub color: wgpu::TextureView,
}

impl BackgroundPass {
    pub fn set_quad(&mut self, queue: &wgpu::Queue, quad: &BackgroundQuad) {
        if self.quad == *quad {
            return;
        }
        self.quad = *quad;
        queue.write_buffer(
            &self.vertex_buffer,
            0,
            bytemuck::cast_slice(&BackgroundVertex::quad(quad)),
        );
    }

    /// Draws the camera frame bound as `frame`.
    pub fn draw_frame(
        render_pass: &mut RenderPass,
        vertex_buffer: &wgpu::Buffer,
        frame: &wgpu::BindGroup,
    ) {
        render_pass.set_bind_group(1, frame, &[]);
        render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
        render_pass.draw(0..6, 0..1);
    }

    pub fn vertex_buffer(&self) -> &wgpu::Buffer {
        &self.vertex_buffer
    }
}

impl Pass for BackgroundPass {
    type TextureViews = BackgroundPassTextureViews;

    fn create(
        device: &Device,
        common: Arc<RenderCommon>,
        cache_builder: &mut PipelineCacheBuilder,
    ) -> anyhow::Result<BackgroundPass> {
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Background Pipeline Layout"),
            bind_group_layouts: &[
                &common.projection_bind_group_layout,
                &common.texture_bind_group_layout,
            ],
            push_constant_ranges: &[],
        });

        let quad = BackgroundQuad::default();
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Background Quad Vertex Buffer"),
            contents: bytemuck::cast_slice(&BackgroundVertex::quad(&quad)),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        });

        let format = common.surface_format();
        let pipeline_id = cache_builder.add_shader(
            BACKGROUND_SHADER,
            Box::new(
                move |device: &Device, shader_def: &ShaderDefinition, source: &str| {
                    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some(shader_def.name),
                        source: ShaderSource::Wgsl(source.into()),
                    });

                    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                        label: Some("Background Pass Pipeline"),
                        layout: Some(&pipeline_layout),
                        vertex: wgpu::VertexState {
                            module: &shader,
                            entry_point: Some("vs_main"),
                            buffers: &[BACKGROUND_VBL],
                            compilation_options: PipelineCompilationOptions::default(),
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: &shader,
                            entry_point: Some("fs_main"),
                            targets: &[Some(wgpu::ColorTargetState {
                                format,
                                blend: Some(wgpu::BlendState::REPLACE),
                                write_mask: wgpu::ColorWrites::ALL,
                            })],
                            compilation_options: PipelineCompilationOptions::default(),
                        }),
                        primitive: wgpu::PrimitiveState {
                            topology: wgpu::PrimitiveTopology::TriangleList,
                            strip_index_format: None,
                            front_face: wgpu::FrontFace::Ccw,
                            cull_mode: None,
                            polygon_mode: wgpu::PolygonMode::Fill,
                            unclipped_depth: false,
                            conservative: false,
                        },
                        // The video sits behind everything, so it never writes depth.
                        depth_stencil: None,
                        multisample: MultisampleState::default(),
                        multiview: None,
                        cache: None,
                    });

                    Ok(pipeline)
                },
            ),
        );

        Ok(Self {
            pipeline_id,
            vertex_buffer,
            quad,
            common,
        })
    }

    fn render<'a, F>(
        &self,
        texture_views: &Self::TextureViews,
        encoder: &mut wgpu::CommandEncoder,
        pipeline_cache: &PipelineCache,
        render_callback: F,
    ) where
        F: FnOnce(&mut RenderPass) + 'a,
    {
        let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("Background Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &texture_views.color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        let Some(pipeline) = pipeline_cache.get(self.pipeline_id) else {
            return;
        };

        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, &self.common.projection_bind_group, &[]);
        render_callback(&mut render_pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_triangles_share_the_diagonal() {
        let vertices = BackgroundVertex::quad(&BackgroundQuad::default());
        assert_eq!(vertices[0], vertices[3]);
        assert_eq!(vertices[2], vertices[4]);
        assert_eq!(vertices[0].tex_coords, Vec2::ZERO);
        assert_eq!(vertices[5].position, Vec3::new(-6.0, 3.0, -10.0));
    }
}
