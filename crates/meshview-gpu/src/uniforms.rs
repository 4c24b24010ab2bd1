//! Per-image uniform data.

use crate::context::DeviceContext;
use crate::error::Result;
use crate::memory::GpuBuffer;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use meshview_core::Camera;

/// Uniform block read by the mesh vertex shader (binding 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub light_position: Vec4,
}

impl UniformBufferObject {
    /// Light orbit radius around the vertical axis.
    pub const LIGHT_RADIUS: f32 = 4.0;
    /// Light height above the origin.
    pub const LIGHT_HEIGHT: f32 = 3.0;

    /// Uniforms for `camera` after `elapsed_seconds` of animation.
    ///
    /// The model stays at identity; the light orbits at twice the elapsed time.
    pub fn new(camera: &Camera, elapsed_seconds: f32) -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: camera.view_matrix(),
            projection: camera.projection_matrix(),
            light_position: Self::light_at(elapsed_seconds),
        }
    }

    /// Light position at `elapsed_seconds`.
    pub fn light_at(elapsed_seconds: f32) -> Vec4 {
        let t = 2.0 * elapsed_seconds;
        Vec4::new(
            Self::LIGHT_RADIUS * t.cos(),
            Self::LIGHT_HEIGHT,
            Self::LIGHT_RADIUS * t.sin(),
            1.0,
        )
    }
}

/// Host-visible buffer holding one [`UniformBufferObject`].
pub struct UniformBuffer {
    buffer: GpuBuffer,
}

impl UniformBuffer {
    pub const SIZE: u64 = std::mem::size_of::<UniformBufferObject>() as u64;

    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let buffer = GpuBuffer::host_visible(ctx, Self::SIZE, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
        Ok(Self { buffer })
    }

    /// Overwrite the buffer contents.
    pub fn update(&self, ubo: &UniformBufferObject) -> Result<()> {
        self.buffer.write(std::slice::from_ref(ubo))
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    #[test]
    fn layout_matches_shader_block() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 3 * 64 + 16);
        assert_eq!(std::mem::offset_of!(UniformBufferObject, light_position), 192);
    }

    #[test]
    fn light_starts_on_positive_x() {
        let light = UniformBufferObject::light_at(0.0);
        assert_relative_eq!(light.x, 4.0);
        assert_relative_eq!(light.y, 3.0);
        assert_relative_eq!(light.z, 0.0);
    }

    #[test]
    fn light_orbits_at_twice_elapsed_time() {
        let quarter = std::f32::consts::FRAC_PI_4;
        let light = UniformBufferObject::light_at(quarter);
        assert_relative_eq!(light.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(light.z, 4.0, epsilon = 1e-5);

        let radius = Vec3::new(light.x, 0.0, light.z).length();
        assert_relative_eq!(radius, UniformBufferObject::LIGHT_RADIUS, epsilon = 1e-5);
    }

    #[test]
    fn matrices_come_from_camera() {
        let camera = Camera::default();
        let ubo = UniformBufferObject::new(&camera, 1.0);
        assert_eq!(ubo.model, Mat4::IDENTITY);
        assert_eq!(ubo.view, camera.view_matrix());
        assert_eq!(ubo.projection, camera.projection_matrix());
    }
}
