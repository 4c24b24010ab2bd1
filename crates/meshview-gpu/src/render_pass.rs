//! Render pass layout for the mesh pipeline.
//!
//! Attachment 0 is the multisampled color target, 1 the multisampled depth
//! target and 2 the single-sampled swapchain image the color resolves into.
//! Sub-pass 0 draws geometry; the optional sub-pass 1 draws the UI overlay on
//! top of the same attachments.

use crate::error::Result;
use ash::vk;
use std::sync::Arc;

/// Sub-pass that draws scene geometry.
pub const GEOMETRY_SUBPASS: u32 = 0;
/// Sub-pass that draws the UI overlay.
pub const OVERLAY_SUBPASS: u32 = 1;

/// Attachment descriptions in color, depth, resolve order.
pub fn attachment_descriptions(
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> [vk::AttachmentDescription; 3] {
    let color = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let depth = vk::AttachmentDescription::default()
        .format(depth_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let resolve = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::DONT_CARE)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    [color, depth, resolve]
}

/// External -> geometry, and geometry -> overlay when the overlay is on.
pub fn subpass_dependencies(overlay: bool) -> Vec<vk::SubpassDependency> {
    let color_output = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let color_access =
        vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;

    let mut dependencies = vec![vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(GEOMETRY_SUBPASS)
        .src_stage_mask(color_output)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(color_output)
        .dst_access_mask(color_access)];

    if overlay {
        dependencies.push(
            vk::SubpassDependency::default()
                .src_subpass(GEOMETRY_SUBPASS)
                .dst_subpass(OVERLAY_SUBPASS)
                .src_stage_mask(color_output)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_stage_mask(color_output)
                .dst_access_mask(color_access),
        );
    }

    dependencies
}

/// Render pass wrapper.
pub struct RenderPass {
    device: Arc<ash::Device>,
    render_pass: vk::RenderPass,
    samples: vk::SampleCountFlags,
    subpass_count: u32,
}

impl RenderPass {
    pub fn new(
        device: Arc<ash::Device>,
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
        overlay: bool,
    ) -> Result<Self> {
        let attachments = attachment_descriptions(color_format, depth_format, samples);

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let resolve_refs = [vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .resolve_attachments(&resolve_refs);
        let subpasses = if overlay {
            vec![subpass, subpass]
        } else {
            vec![subpass]
        };

        let dependencies = subpass_dependencies(overlay);

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.create_render_pass(&create_info, None)? };

        Ok(Self {
            device,
            render_pass,
            samples,
            subpass_count: subpasses.len() as u32,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    /// Whether the overlay sub-pass exists.
    pub fn has_overlay_subpass(&self) -> bool {
        self.subpass_count > OVERLAY_SUBPASS
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachments_follow_msaa_resolve_layout() {
        let [color, depth, resolve] = attachment_descriptions(
            vk::Format::B8G8R8A8_UNORM,
            vk::Format::D32_SFLOAT,
            vk::SampleCountFlags::TYPE_8,
        );

        assert_eq!(color.samples, vk::SampleCountFlags::TYPE_8);
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);

        assert_eq!(depth.format, vk::Format::D32_SFLOAT);
        assert_eq!(depth.samples, vk::SampleCountFlags::TYPE_8);
        assert_eq!(
            depth.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );

        assert_eq!(resolve.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(resolve.load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(resolve.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(resolve.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn overlay_adds_dependency_between_subpasses() {
        assert_eq!(subpass_dependencies(false).len(), 1);

        let deps = subpass_dependencies(true);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(deps[0].dst_subpass, GEOMETRY_SUBPASS);
        assert_eq!(deps[1].src_subpass, GEOMETRY_SUBPASS);
        assert_eq!(deps[1].dst_subpass, OVERLAY_SUBPASS);
        for dep in &deps {
            assert_eq!(dep.dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
            assert!(dep
                .dst_access_mask
                .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
        }
    }
}
