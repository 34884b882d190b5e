use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;

use crate::config::ProjectionConfig;

/// Perspective lens of the virtual camera. Aspect follows the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl From<ProjectionConfig> for Projection {
    fn from(config: ProjectionConfig) -> Self {
        Self {
            fov_y_degrees: config.fov_y_degrees,
            near: config.near,
            far: config.far,
        }
    }
}

impl Projection {
    pub fn aspect_ratio(size: PhysicalSize<u32>) -> f32 {
        size.width.max(1) as f32 / size.height.max(1) as f32
    }

    pub fn matrix(&self, aspect_ratio: f32) -> Mat4 {
        Mat4::perspective_rh(
            self.fov_y_degrees.to_radians(),
            aspect_ratio,
            self.near,
            self.far,
        )
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct ProjectionUniform {
    pub projection: Mat4,
}

impl ProjectionUniform {
    pub fn new(projection: &Projection, size: PhysicalSize<u32>) -> Self {
        Self {
            projection: projection.matrix(Projection::aspect_ratio(size)),
        }
    }

    pub fn create_buffer(&self, device: &wgpu::Device) -> wgpu::Buffer {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Projection Buffer"),
            contents: bytemuck::cast_slice(&[*self]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
    }

    pub fn update_buffer(&self, queue: &wgpu::Queue, buffer: &wgpu::Buffer) {
        queue.write_buffer(buffer, 0, bytemuck::cast_slice(&[*self]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    fn projection() -> Projection {
        Projection::from(ProjectionConfig::default())
    }

    #[test]
    fn near_and_far_map_to_depth_range() {
        let m = projection().matrix(640.0 / 480.0);

        let near = m * Vec4::new(0.0, 0.0, -1.0, 1.0);
        let far = m * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-6);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn background_plane_is_inside_depth_range() {
        let m = projection().matrix(640.0 / 480.0);
        let p = m * Vec4::new(0.0, 3.0, -10.0, 1.0);
        let depth = p.z / p.w;
        assert!(depth > 0.0 && depth < 1.0);
        // tan(22.5 deg) * 10 > 3, so the top edge is on screen.
        assert!(p.y / p.w < 1.0);
    }

    #[test]
    fn aspect_ratio_tolerates_minimised_window() {
        assert_eq!(Projection::aspect_ratio(PhysicalSize::new(640, 0)), 640.0);
        assert_eq!(Projection::aspect_ratio(PhysicalSize::new(640, 480)), 640.0 / 480.0);
    }
}
