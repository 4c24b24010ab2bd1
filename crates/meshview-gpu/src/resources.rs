//! Staged uploads, mesh buffers and attachment images.

use crate::command::{execute_single_time_commands, CommandPools};
use crate::context::DeviceContext;
use crate::device::has_stencil_component;
use crate::error::{GpuError, Result};
use crate::memory::{GpuBuffer, GpuImage, ImageDesc};
use ash::vk;
use meshview_core::Mesh;

/// Copy `bytes` into a new device-local buffer through a staging buffer.
///
/// The copy runs on the transfer queue (graphics when no dedicated family
/// exists) and this call blocks until it has completed. The staging buffer
/// is released before returning.
pub fn upload_buffer(
    ctx: &DeviceContext,
    pools: &CommandPools,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
    let size = bytes.len() as u64;
    let staging = GpuBuffer::host_visible(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
    staging.write_bytes(0, bytes)?;

    let buffer = GpuBuffer::new(
        ctx,
        size,
        vk::BufferUsageFlags::TRANSFER_DST | usage,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    copy_buffer(ctx, pools, &staging, &buffer, size)?;
    Ok(buffer)
}

/// Record and wait for a whole-range copy between two buffers.
fn copy_buffer(
    ctx: &DeviceContext,
    pools: &CommandPools,
    src: &GpuBuffer,
    dst: &GpuBuffer,
    size: u64,
) -> Result<()> {
    let device = ctx.device();
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    unsafe {
        execute_single_time_commands(device, pools.transfer_pool(), ctx.transfer_queue(), |cmd| {
            device.cmd_copy_buffer(cmd, src.handle(), dst.handle(), &[region]);
        })
    }
}

impl GpuBuffer {
    /// Copy the contents of a device-local buffer back to the host.
    ///
    /// The buffer must have been created with `TRANSFER_SRC` usage.
    pub fn read_back(&self, ctx: &DeviceContext, pools: &CommandPools) -> Result<Vec<u8>> {
        if !self.usage().contains(vk::BufferUsageFlags::TRANSFER_SRC) {
            return Err(GpuError::InvalidState(
                "Buffer was not created with TRANSFER_SRC usage".to_string(),
            ));
        }
        let staging = GpuBuffer::host_visible(ctx, self.size(), vk::BufferUsageFlags::TRANSFER_DST)?;
        copy_buffer(ctx, pools, self, &staging, self.size())?;
        staging.read_bytes()
    }
}

/// Device-local vertex and index buffers of one mesh.
pub struct MeshBuffers {
    pub vertex: GpuBuffer,
    pub index: GpuBuffer,
    index_count: u32,
}

impl MeshBuffers {
    /// Usage of both mirror buffers besides their primary role.
    ///
    /// `TRANSFER_SRC` keeps the mirror readable for diagnostics.
    const EXTRA_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::TRANSFER_SRC;

    /// Upload one mesh.
    pub fn upload(ctx: &DeviceContext, pools: &CommandPools, mesh: &Mesh) -> Result<Self> {
        if mesh.vertices.is_empty() || mesh.faces.is_empty() {
            return Err(GpuError::InvalidState(format!(
                "Mesh '{}' has no vertices or no faces",
                mesh.name
            )));
        }

        let vertex = upload_buffer(
            ctx,
            pools,
            mesh.vertex_bytes(),
            vk::BufferUsageFlags::VERTEX_BUFFER | Self::EXTRA_USAGE,
        )?;
        let index = upload_buffer(
            ctx,
            pools,
            mesh.index_bytes(),
            vk::BufferUsageFlags::INDEX_BUFFER | Self::EXTRA_USAGE,
        )?;

        tracing::debug!(
            "Uploaded mesh '{}': {} vertices, {} faces",
            mesh.name,
            mesh.vertices.len(),
            mesh.faces.len()
        );

        Ok(Self {
            vertex,
            index,
            index_count: mesh.index_count(),
        })
    }

    /// Upload every mesh of a scene.
    pub fn upload_all(ctx: &DeviceContext, pools: &CommandPools, meshes: &[Mesh]) -> Result<Vec<Self>> {
        meshes.iter().map(|mesh| Self::upload(ctx, pools, mesh)).collect()
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Multisampled color target the scene renders into before resolve.
///
/// Returned in `COLOR_ATTACHMENT_OPTIMAL`.
pub fn create_color_target(
    ctx: &DeviceContext,
    pools: &CommandPools,
    format: vk::Format,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
) -> Result<GpuImage> {
    let image = GpuImage::new(
        ctx,
        &ImageDesc {
            extent,
            format,
            samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            aspect: vk::ImageAspectFlags::COLOR,
        },
    )?;
    transition_image_layout(
        ctx,
        pools,
        &image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    )?;
    Ok(image)
}

/// Multisampled depth target, returned in `DEPTH_STENCIL_ATTACHMENT_OPTIMAL`.
pub fn create_depth_target(
    ctx: &DeviceContext,
    pools: &CommandPools,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
) -> Result<GpuImage> {
    let image = GpuImage::new(
        ctx,
        &ImageDesc {
            extent,
            format: ctx.depth_format(),
            samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
        },
    )?;
    transition_image_layout(
        ctx,
        pools,
        &image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    )?;
    Ok(image)
}

/// Access masks and stages for a layout transition barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier parameters for the supported layout transitions.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    use vk::AccessFlags as Access;
    use vk::ImageLayout as Layout;
    use vk::PipelineStageFlags as Stage;

    let masks = match (old, new) {
        (Layout::UNDEFINED, Layout::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_access: Access::empty(),
            dst_access: Access::TRANSFER_WRITE,
            src_stage: Stage::TOP_OF_PIPE,
            dst_stage: Stage::TRANSFER,
        },
        (Layout::TRANSFER_DST_OPTIMAL, Layout::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_access: Access::TRANSFER_WRITE,
            dst_access: Access::SHADER_READ,
            src_stage: Stage::TRANSFER,
            dst_stage: Stage::FRAGMENT_SHADER,
        },
        (Layout::UNDEFINED, Layout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => TransitionMasks {
            src_access: Access::empty(),
            dst_access: Access::DEPTH_STENCIL_ATTACHMENT_READ
                | Access::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: Stage::TOP_OF_PIPE,
            dst_stage: Stage::EARLY_FRAGMENT_TESTS,
        },
        (Layout::UNDEFINED, Layout::COLOR_ATTACHMENT_OPTIMAL) => TransitionMasks {
            src_access: Access::empty(),
            dst_access: Access::COLOR_ATTACHMENT_READ | Access::COLOR_ATTACHMENT_WRITE,
            src_stage: Stage::TOP_OF_PIPE,
            dst_stage: Stage::COLOR_ATTACHMENT_OUTPUT,
        },
        (from, to) => return Err(GpuError::UnsupportedLayoutTransition { from, to }),
    };
    Ok(masks)
}

/// Aspect touched by a transition into `new` for an image of `format`.
pub fn transition_aspect(format: vk::Format, new: vk::ImageLayout) -> vk::ImageAspectFlags {
    if new == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        if has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Transition `image` with a one-time barrier on the graphics queue.
pub fn transition_image_layout(
    ctx: &DeviceContext,
    pools: &CommandPools,
    image: &GpuImage,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let masks = transition_masks(old, new)?;
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image.handle())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(transition_aspect(image.format(), new))
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        )
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    let device = ctx.device();
    unsafe {
        execute_single_time_commands(device, &pools.graphics, ctx.graphics_queue(), |cmd| {
            device.cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_transition_waits_for_early_fragment_tests() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert!(masks
            .dst_access
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn upload_transition_chain_is_supported() {
        let first = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        let second = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(first.dst_stage, second.src_stage);
        assert_eq!(second.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn unknown_transition_is_an_error() {
        let result = transition_masks(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        match result {
            Err(GpuError::UnsupportedLayoutTransition { from, to }) => {
                assert_eq!(from, vk::ImageLayout::PRESENT_SRC_KHR);
                assert_eq!(to, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            }
            other => panic!("expected UnsupportedLayoutTransition, got {other:?}"),
        }
    }

    #[test]
    fn stencil_formats_add_stencil_aspect() {
        let depth = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        assert_eq!(
            transition_aspect(vk::Format::D32_SFLOAT, depth),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            transition_aspect(vk::Format::D24_UNORM_S8_UINT, depth),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            transition_aspect(
                vk::Format::B8G8R8A8_UNORM,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            ),
            vk::ImageAspectFlags::COLOR
        );
    }
}
