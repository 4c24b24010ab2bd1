//! Command buffer recording for one swapchain image.
//!
//! Geometry goes into a secondary buffer that is only re-recorded when the
//! meshes or the frame targets change. The primary buffer wraps it in the
//! render pass and is re-recorded every frame so the overlay can append fresh
//! draw data.

use crate::command::{begin_command_buffer, end_command_buffer};
use crate::error::Result;
use crate::overlay::{has_drawable_area, OverlayRenderer};
use crate::pipeline::GraphicsPipeline;
use crate::render_pass::{RenderPass, GEOMETRY_SUBPASS};
use crate::resources::MeshBuffers;
use ash::vk;

/// Background color, the accent orange (255, 153, 51).
pub const CLEAR_COLOR: [f32; 4] = [1.0, 0.6, 0.2, 1.0];

/// Clear values for the color and depth attachments.
pub fn clear_values() -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: CLEAR_COLOR,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

/// Record the geometry draws of one image into a secondary buffer.
///
/// # Safety
/// `cmd` must not be pending execution, and every handle must be valid.
pub unsafe fn record_geometry(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    render_pass: &RenderPass,
    framebuffer: vk::Framebuffer,
    pipeline: &GraphicsPipeline,
    descriptor_set: vk::DescriptorSet,
    meshes: &[MeshBuffers],
) -> Result<()> {
    let inheritance = vk::CommandBufferInheritanceInfo::default()
        .render_pass(render_pass.handle())
        .subpass(GEOMETRY_SUBPASS)
        .framebuffer(framebuffer);
    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(
            vk::CommandBufferUsageFlags::SIMULTANEOUS_USE
                | vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE,
        )
        .inheritance_info(&inheritance);
    device.begin_command_buffer(cmd, &begin_info)?;

    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
    for mesh in meshes {
        device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex.handle()], &[0]);
        device.cmd_bind_index_buffer(cmd, mesh.index.handle(), 0, vk::IndexType::UINT32);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            pipeline.layout(),
            0,
            &[descriptor_set],
            &[],
        );
        device.cmd_draw_indexed(cmd, mesh.index_count(), 1, 0, 0, 0);
    }

    end_command_buffer(device, cmd)
}

/// Record the primary buffer of one image.
///
/// # Safety
/// `cmd` must not be pending execution and `secondary` must have been
/// recorded against the same render pass and framebuffer.
pub unsafe fn record_frame(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    render_pass: &RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    secondary: vk::CommandBuffer,
    overlay: Option<&mut (dyn OverlayRenderer + '_)>,
) -> Result<()> {
    begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::SIMULTANEOUS_USE)?;

    let clear = clear_values();
    let render_pass_info = vk::RenderPassBeginInfo::default()
        .render_pass(render_pass.handle())
        .framebuffer(framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        })
        .clear_values(&clear);

    device.cmd_begin_render_pass(
        cmd,
        &render_pass_info,
        vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
    );
    device.cmd_execute_commands(cmd, &[secondary]);

    if render_pass.has_overlay_subpass() {
        device.cmd_next_subpass(cmd, vk::SubpassContents::INLINE);
        if let Some(overlay) = overlay {
            if has_drawable_area(overlay.display_size()) {
                overlay.record(device, cmd)?;
            }
        }
    }

    device.cmd_end_render_pass(cmd);
    end_command_buffer(device, cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clears_to_accent_color_and_far_depth() {
        let [color, depth] = clear_values();
        unsafe {
            assert_eq!(color.color.float32, [1.0, 0.6, 0.2, 1.0]);
            assert_eq!(depth.depth_stencil.depth, 1.0);
            assert_eq!(depth.depth_stencil.stencil, 0);
        }
    }

    #[test]
    fn accent_color_matches_byte_values() {
        let bytes = CLEAR_COLOR.map(|c| (c * 255.0).round() as u8);
        assert_eq!(bytes, [255, 153, 51, 255]);
    }
}
