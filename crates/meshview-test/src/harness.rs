//! Surface-less device context for upload and read-back tests.
//!
//! Nothing is rendered here: the harness only exercises the transfer path
//! that the engine uses for mesh uploads.

use ash::vk;
use meshview_core::Mesh;
use meshview_gpu::device::DeviceRequirements;
use meshview_gpu::instance::{load_entry, VulkanInstance};
use meshview_gpu::resources::{create_color_target, create_depth_target, upload_buffer};
use meshview_gpu::{CommandPools, DeviceContext, GpuBuffer, GpuImage, MeshBuffers};

use crate::{Result, TestError};

/// Device context without a surface.
///
/// Field order is teardown order.
pub struct GpuHarness {
    pools: CommandPools,
    context: DeviceContext,
    instance: VulkanInstance,
}

/// Bytes read back from a mesh's GPU mirror.
#[derive(Debug, Clone)]
pub struct MeshReadback {
    pub vertex_bytes: Vec<u8>,
    pub index_bytes: Vec<u8>,
    pub index_count: u32,
}

impl GpuHarness {
    /// Create a harness on the first device with a graphics queue.
    pub fn new() -> Result<Self> {
        let entry = load_entry()?;
        let instance = VulkanInstance::new(entry, "meshview-test", &[], false)?;
        let context = DeviceContext::new(
            instance.instance(),
            &DeviceRequirements::headless(),
            None,
            false,
        )?;
        let pools = CommandPools::new(&context)?;

        Ok(Self {
            pools,
            context,
            instance,
        })
    }

    /// Create a harness, or report why none is available.
    ///
    /// Tests use this to skip on machines without a Vulkan device.
    pub fn try_new() -> Option<Self> {
        match Self::new() {
            Ok(harness) => Some(harness),
            Err(e) => {
                eprintln!("Skipping GPU test, no Vulkan device available: {e}");
                None
            }
        }
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    pub fn pools(&self) -> &CommandPools {
        &self.pools
    }

    pub fn instance(&self) -> &VulkanInstance {
        &self.instance
    }

    /// Upload raw bytes into a device-local buffer that can be read back.
    pub fn upload_bytes(&self, bytes: &[u8]) -> Result<GpuBuffer> {
        let buffer = upload_buffer(
            &self.context,
            &self.pools,
            bytes,
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::STORAGE_BUFFER,
        )?;
        Ok(buffer)
    }

    /// Copy a device-local buffer back through a second staging buffer.
    pub fn read_back(&self, buffer: &GpuBuffer) -> Result<Vec<u8>> {
        Ok(buffer.read_back(&self.context, &self.pools)?)
    }

    /// Upload a mesh the way the engine does.
    pub fn upload_mesh(&self, mesh: &Mesh) -> Result<MeshBuffers> {
        Ok(MeshBuffers::upload(&self.context, &self.pools, mesh)?)
    }

    /// Upload a mesh and read both buffers back.
    pub fn mesh_round_trip(&self, mesh: &Mesh) -> Result<MeshReadback> {
        let buffers = self.upload_mesh(mesh)?;
        Ok(MeshReadback {
            vertex_bytes: self.read_back(&buffers.vertex)?,
            index_bytes: self.read_back(&buffers.index)?,
            index_count: buffers.index_count(),
        })
    }

    /// Build the multisampled color and depth attachments the way a frame
    /// rebuild does, transitions included.
    pub fn attachment_targets(&self, extent: vk::Extent2D) -> Result<(GpuImage, GpuImage)> {
        let samples = self.context.msaa_samples();
        let color = create_color_target(
            &self.context,
            &self.pools,
            vk::Format::B8G8R8A8_UNORM,
            extent,
            samples,
        )?;
        let depth = create_depth_target(&self.context, &self.pools, extent, samples)?;
        Ok((color, depth))
    }

    /// Check that a mesh survives upload and read-back byte for byte.
    pub fn verify_mesh_round_trip(&self, mesh: &Mesh) -> Result<()> {
        let readback = self.mesh_round_trip(mesh)?;

        if readback.vertex_bytes.len() as u64 != mesh.vertex_buffer_size() {
            return Err(TestError::Mismatch(format!(
                "vertex buffer holds {} bytes, expected {}",
                readback.vertex_bytes.len(),
                mesh.vertex_buffer_size()
            )));
        }
        if readback.index_bytes.len() as u64 != mesh.index_buffer_size() {
            return Err(TestError::Mismatch(format!(
                "index buffer holds {} bytes, expected {}",
                readback.index_bytes.len(),
                mesh.index_buffer_size()
            )));
        }
        if readback.vertex_bytes != mesh.vertex_bytes() {
            return Err(TestError::Mismatch("vertex bytes differ".to_string()));
        }
        if readback.index_bytes != mesh.index_bytes() {
            return Err(TestError::Mismatch("index bytes differ".to_string()));
        }

        tracing::debug!("Mesh '{}' round-tripped", mesh.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshview_core::Vertex;
    use meshview_gpu::GpuError;

    #[test]
    fn quad_round_trips_bit_identical() {
        let Some(harness) = GpuHarness::try_new() else {
            return;
        };
        let quad = Mesh::quad();
        let readback = harness.mesh_round_trip(&quad).unwrap();

        assert_eq!(readback.vertex_bytes.len(), 4 * std::mem::size_of::<Vertex>());
        assert_eq!(readback.index_bytes.len(), 2 * 3 * 4);
        assert_eq!(readback.index_count, 6);
        assert_eq!(readback.vertex_bytes, quad.vertex_bytes());
        assert_eq!(readback.index_bytes, quad.index_bytes());
    }

    #[test]
    fn cube_round_trips() {
        let Some(harness) = GpuHarness::try_new() else {
            return;
        };
        harness.verify_mesh_round_trip(&Mesh::cube()).unwrap();
    }

    #[test]
    fn raw_bytes_round_trip() {
        let Some(harness) = GpuHarness::try_new() else {
            return;
        };
        let bytes: Vec<u8> = (0..=255).cycle().take(4096 + 12).collect();
        let buffer = harness.upload_bytes(&bytes).unwrap();
        assert_eq!(buffer.size(), bytes.len() as u64);
        assert_eq!(harness.read_back(&buffer).unwrap(), bytes);
    }

    #[test]
    fn empty_mesh_is_rejected() {
        let Some(harness) = GpuHarness::try_new() else {
            return;
        };
        let empty = Mesh::new("empty", Vec::new(), Vec::new());
        assert!(matches!(
            harness.upload_mesh(&empty),
            Err(TestError::Gpu(GpuError::InvalidState(_)))
        ));
    }

    #[test]
    fn attachments_are_created_and_transitioned() {
        let Some(harness) = GpuHarness::try_new() else {
            return;
        };
        let extent = vk::Extent2D {
            width: 320,
            height: 240,
        };
        let (color, depth) = harness.attachment_targets(extent).unwrap();
        let samples = harness.context().msaa_samples();

        assert_eq!(color.format(), vk::Format::B8G8R8A8_UNORM);
        assert_eq!(color.samples(), samples);
        assert_eq!(color.extent(), extent);
        assert_eq!(depth.format(), harness.context().depth_format());
        assert_eq!(depth.samples(), samples);
        assert_ne!(color.view(), vk::ImageView::null());
        assert_ne!(depth.view(), vk::ImageView::null());

        // Both barriers ran to completion on the graphics queue
        harness.context().wait_idle().unwrap();
    }

    #[test]
    fn unsupported_transition_on_real_image_is_rejected() {
        let Some(harness) = GpuHarness::try_new() else {
            return;
        };
        let extent = vk::Extent2D {
            width: 64,
            height: 64,
        };
        let (color, _depth) = harness.attachment_targets(extent).unwrap();
        let result = meshview_gpu::resources::transition_image_layout(
            harness.context(),
            harness.pools(),
            &color,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert!(matches!(
            result,
            Err(GpuError::UnsupportedLayoutTransition { .. })
        ));
    }

    #[test]
    fn read_back_requires_transfer_source() {
        let Some(harness) = GpuHarness::try_new() else {
            return;
        };
        let buffer = GpuBuffer::host_visible(
            harness.context(),
            64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )
        .unwrap();
        assert!(harness.read_back(&buffer).is_err());
    }
}
