//! Everything that depends on the swapchain, built and dropped as one unit.

use crate::command::{CommandBuffers, CommandPools};
use crate::context::DeviceContext;
use crate::descriptors::{
    uniform_pool_sizes, write_uniform_buffer, DescriptorPool, DescriptorSetLayout, UNIFORM_BINDING,
};
use crate::error::{GpuError, Result};
use crate::memory::GpuImage;
use crate::overlay::OverlayRenderer;
use crate::pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
use crate::recorder::{record_frame, record_geometry};
use crate::render_pass::{RenderPass, GEOMETRY_SUBPASS, OVERLAY_SUBPASS};
use crate::resources::{create_color_target, create_depth_target, MeshBuffers};
use crate::surface::Surface;
use crate::swapchain::Swapchain;
use crate::uniforms::{UniformBuffer, UniformBufferObject};
use ash::vk;
use std::path::Path;
use std::sync::Arc;

/// Options that shape the frame targets.
#[derive(Debug, Clone, Copy)]
pub struct TargetOptions<'a> {
    pub window_extent: vk::Extent2D,
    pub vsync: bool,
    pub overlay_subpass: bool,
    pub shader_dir: &'a Path,
}

/// One framebuffer per swapchain image.
pub struct Framebuffers {
    device: Arc<ash::Device>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Framebuffers {
    /// Framebuffers over `[color, depth, swapchain view]` for each view.
    pub fn new(
        device: Arc<ash::Device>,
        render_pass: &RenderPass,
        color: &GpuImage,
        depth: &GpuImage,
        swapchain_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut owned = Self {
            device,
            framebuffers: Vec::with_capacity(swapchain_views.len()),
        };
        for &view in swapchain_views {
            let attachments = [color.view(), depth.view(), view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle())
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = unsafe { owned.device.create_framebuffer(&info, None)? };
            owned.framebuffers.push(framebuffer);
        }
        Ok(owned)
    }

    pub fn get(&self, index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

/// Per-image resource counts after a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetCounts {
    pub images: usize,
    pub views: usize,
    pub framebuffers: usize,
    pub uniforms: usize,
    pub descriptor_sets: usize,
    pub primary: usize,
    pub secondary: usize,
}

impl TargetCounts {
    /// Whether every per-image resource exists once per swapchain image.
    pub fn counts_match(&self) -> bool {
        self.images > 0
            && [
                self.views,
                self.framebuffers,
                self.uniforms,
                self.descriptor_sets,
                self.primary,
                self.secondary,
            ]
            .iter()
            .all(|&count| count == self.images)
    }
}

/// Swapchain-dependent state.
///
/// Field order is teardown order: command buffers, framebuffers, pipeline,
/// render pass, attachments, uniforms and descriptors, then the swapchain.
pub struct FrameTargets {
    primary: CommandBuffers,
    secondary: CommandBuffers,
    framebuffers: Framebuffers,
    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    depth: GpuImage,
    color: GpuImage,
    uniforms: Vec<UniformBuffer>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    /// Owns the descriptor sets
    #[allow(dead_code)]
    descriptor_pool: DescriptorPool,
    swapchain: Swapchain,
}

impl FrameTargets {
    /// Build the chain and everything sized by it.
    pub fn build(
        ctx: &DeviceContext,
        surface: &Surface,
        pools: &CommandPools,
        descriptor_set_layout: &DescriptorSetLayout,
        options: &TargetOptions<'_>,
    ) -> Result<Self> {
        let device = ctx.device();
        let swapchain = Swapchain::new(ctx, surface, options.window_extent, options.vsync)?;
        let image_count = swapchain.image_count();
        let extent = swapchain.extent();
        let samples = ctx.msaa_samples();
        let color_format = swapchain.format().format;

        let set_count = u32::try_from(image_count)
            .map_err(|_| GpuError::InvalidState(format!("{image_count} swapchain images")))?;
        let descriptor_pool =
            DescriptorPool::new(device.clone(), set_count, &uniform_pool_sizes(set_count))?;
        let layouts = vec![descriptor_set_layout.handle(); image_count];
        let descriptor_sets = descriptor_pool.allocate(&layouts)?;

        let mut uniforms = Vec::with_capacity(image_count);
        for &set in &descriptor_sets {
            let uniform = UniformBuffer::new(ctx)?;
            unsafe {
                write_uniform_buffer(device, set, UNIFORM_BINDING, uniform.handle(), UniformBuffer::SIZE);
            }
            uniforms.push(uniform);
        }

        let color = create_color_target(ctx, pools, color_format, extent, samples)?;
        let depth = create_depth_target(ctx, pools, extent, samples)?;

        let render_pass = RenderPass::new(
            device.clone(),
            color_format,
            ctx.depth_format(),
            samples,
            options.overlay_subpass,
        )?;

        let config = GraphicsPipelineConfig {
            subpass: GEOMETRY_SUBPASS,
            ..GraphicsPipelineConfig::mesh(options.shader_dir, extent, samples)?
        };
        let pipeline = GraphicsPipeline::new(
            device.clone(),
            &config,
            render_pass.handle(),
            &[descriptor_set_layout.handle()],
        )?;

        let framebuffers = Framebuffers::new(
            device.clone(),
            &render_pass,
            &color,
            &depth,
            swapchain.image_views(),
            extent,
        )?;

        let primary = pools
            .graphics
            .allocate(vk::CommandBufferLevel::PRIMARY, set_count)?;
        let secondary = pools
            .graphics
            .allocate(vk::CommandBufferLevel::SECONDARY, set_count)?;

        let targets = Self {
            primary,
            secondary,
            framebuffers,
            pipeline,
            render_pass,
            depth,
            color,
            uniforms,
            descriptor_sets,
            descriptor_pool,
            swapchain,
        };
        debug_assert!(targets.is_consistent(), "{:?}", targets.counts());

        tracing::debug!(
            "Frame targets built: {image_count} images, {}x{}, color {:?} depth {:?} at {:?}",
            extent.width,
            extent.height,
            targets.color.format(),
            targets.depth.format(),
            targets.color.samples()
        );
        Ok(targets)
    }

    pub fn counts(&self) -> TargetCounts {
        TargetCounts {
            images: self.swapchain.image_count(),
            views: self.swapchain.image_views().len(),
            framebuffers: self.framebuffers.len(),
            uniforms: self.uniforms.len(),
            descriptor_sets: self.descriptor_sets.len(),
            primary: self.primary.len(),
            secondary: self.secondary.len(),
        }
    }

    /// Whether every per-image resource matches the image count.
    pub fn is_consistent(&self) -> bool {
        self.counts().counts_match()
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Primary command buffer of an image.
    pub fn primary(&self, image: usize) -> Result<vk::CommandBuffer> {
        self.primary
            .get(image)
            .ok_or_else(|| GpuError::InvalidState(format!("No command buffer for image {image}")))
    }

    /// Record the geometry of `meshes` into every image's secondary buffer.
    ///
    /// The caller must ensure no submission using these buffers is pending.
    pub fn record_geometry(&self, device: &ash::Device, meshes: &[MeshBuffers]) -> Result<()> {
        for image in 0..self.image_count() {
            let (cmd, framebuffer, set) = self.per_image(image)?;
            unsafe {
                record_geometry(
                    device,
                    cmd,
                    &self.render_pass,
                    framebuffer,
                    &self.pipeline,
                    set,
                    meshes,
                )?;
            }
        }
        Ok(())
    }

    /// Re-record the primary buffer of `image`.
    ///
    /// The caller must have waited on the fence guarding this image.
    pub fn record_frame(
        &self,
        device: &ash::Device,
        image: usize,
        overlay: Option<&mut (dyn OverlayRenderer + '_)>,
    ) -> Result<vk::CommandBuffer> {
        let (secondary, framebuffer, _) = self.per_image(image)?;
        let cmd = self.primary(image)?;
        unsafe {
            record_frame(
                device,
                cmd,
                &self.render_pass,
                framebuffer,
                self.extent(),
                secondary,
                overlay,
            )?;
        }
        Ok(cmd)
    }

    /// Write this frame's uniforms for `image`.
    pub fn update_uniforms(&self, image: usize, ubo: &UniformBufferObject) -> Result<()> {
        self.uniforms
            .get(image)
            .ok_or_else(|| GpuError::InvalidState(format!("No uniform buffer for image {image}")))?
            .update(ubo)
    }

    /// Let the overlay rebuild against the current render pass.
    pub fn prepare_overlay(
        &self,
        device: &ash::Device,
        overlay: &mut (dyn OverlayRenderer + '_),
    ) -> Result<()> {
        if !self.render_pass.has_overlay_subpass() {
            return Ok(());
        }
        overlay.prepare(
            device,
            self.render_pass.handle(),
            OVERLAY_SUBPASS,
            self.render_pass.samples(),
        )
    }

    fn per_image(&self, image: usize) -> Result<(vk::CommandBuffer, vk::Framebuffer, vk::DescriptorSet)> {
        let missing = || GpuError::InvalidState(format!("Image {image} is out of range"));
        let secondary = self.secondary.get(image).ok_or_else(missing)?;
        let framebuffer = self.framebuffers.get(image).ok_or_else(missing)?;
        let set = self.descriptor_sets.get(image).copied().ok_or_else(missing)?;
        Ok((secondary, framebuffer, set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(count: usize) -> TargetCounts {
        TargetCounts {
            images: count,
            views: count,
            framebuffers: count,
            uniforms: count,
            descriptor_sets: count,
            primary: count,
            secondary: count,
        }
    }

    #[test]
    fn matching_counts_are_consistent() {
        assert!(uniform(3).counts_match());
        assert!(uniform(2).counts_match());
    }

    #[test]
    fn stale_uniforms_are_detected() {
        let counts = TargetCounts {
            uniforms: 2,
            ..uniform(3)
        };
        assert!(!counts.counts_match());
    }

    #[test]
    fn missing_framebuffer_is_detected() {
        let counts = TargetCounts {
            framebuffers: 4,
            ..uniform(3)
        };
        assert!(!counts.counts_match());
    }

    #[test]
    fn empty_chain_is_not_consistent() {
        assert!(!uniform(0).counts_match());
    }
}
