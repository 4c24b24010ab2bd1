//! GPU memory management.
//!
//! Every buffer and image gets its own dedicated `vk::DeviceMemory`
//! allocation bound at offset 0.

use crate::context::DeviceContext;
use crate::device::QueueFamilyIndices;
use crate::error::{GpuError, Result};
use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

/// Index of the first memory type allowed by `type_bits` whose flags contain
/// all of `properties`.
pub fn find_memory_type(
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
) -> Result<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|&(i, memory_type)| {
            type_bits & (1u32 << i) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(i, _)| i as u32)
        .ok_or(GpuError::NoSuitableMemoryType {
            type_bits,
            properties,
        })
}

/// How a resource is shared between queue families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharingPolicy {
    Exclusive,
    Concurrent(Vec<u32>),
}

impl SharingPolicy {
    /// Buffers are concurrent over graphics and transfer when transfer has
    /// its own family.
    pub fn for_buffers(indices: &QueueFamilyIndices) -> Self {
        match (indices.graphics, indices.transfer) {
            (Some(graphics), Some(transfer)) if indices.transfer_available() => {
                Self::Concurrent(vec![graphics, transfer])
            }
            _ => Self::Exclusive,
        }
    }

    /// Swapchain images are concurrent over graphics and present when those
    /// differ.
    pub fn for_swapchain(indices: &QueueFamilyIndices) -> Self {
        match (indices.graphics, indices.present) {
            (Some(graphics), Some(present)) if graphics != present => {
                Self::Concurrent(vec![graphics, present])
            }
            _ => Self::Exclusive,
        }
    }

    pub fn mode(&self) -> vk::SharingMode {
        match self {
            Self::Exclusive => vk::SharingMode::EXCLUSIVE,
            Self::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    /// Family indices to list in create infos; empty when exclusive.
    pub fn queue_families(&self) -> &[u32] {
        match self {
            Self::Exclusive => &[],
            Self::Concurrent(families) => families,
        }
    }
}

/// A buffer with its dedicated allocation.
pub struct GpuBuffer {
    device: Arc<ash::Device>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: u64,
    usage: vk::BufferUsageFlags,
}

impl GpuBuffer {
    /// Create a buffer, allocate memory with `properties` and bind it.
    pub fn new(
        ctx: &DeviceContext,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        if size == 0 {
            return Err(GpuError::InvalidState(
                "Cannot create an empty buffer".to_string(),
            ));
        }

        let device = ctx.device().clone();
        let sharing = ctx.buffer_sharing();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing.mode())
            .queue_family_indices(sharing.queue_families());

        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = match allocate(&device, ctx, requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(e.into());
        }

        Ok(Self {
            device,
            buffer,
            memory,
            size,
            usage,
        })
    }

    /// Host-visible, host-coherent buffer for CPU writes.
    pub fn host_visible(ctx: &DeviceContext, size: u64, usage: vk::BufferUsageFlags) -> Result<Self> {
        Self::new(
            ctx,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Write raw bytes at `offset` (memory must be host-visible).
    ///
    /// The range is mapped, copied and unmapped on every call.
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(format!(
                "Write of {} bytes at {offset} exceeds buffer size {}",
                data.len(),
                self.size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        unsafe {
            let ptr = self.device.map_memory(
                self.memory,
                offset,
                data.len() as u64,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.unmap_memory(self.memory);
        }

        Ok(())
    }

    /// Write typed data at the start of the buffer.
    pub fn write<T: Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Copy the whole buffer out (memory must be host-visible).
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; self.size as usize];
        unsafe {
            let ptr = self.device.map_memory(
                self.memory,
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), bytes.as_mut_ptr(), bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(bytes)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Parameters for [`GpuImage::new`].
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// A 2D image with its dedicated allocation and a view over it.
pub struct GpuImage {
    device: Arc<ash::Device>,
    view: vk::ImageView,
    image: vk::Image,
    memory: vk::DeviceMemory,
    format: vk::Format,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
}

impl GpuImage {
    /// Create a device-local image and its view.
    pub fn new(ctx: &DeviceContext, desc: &ImageDesc) -> Result<Self> {
        let device = ctx.device().clone();
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(desc.samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.create_image(&image_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let memory = match allocate(
            &device,
            ctx,
            requirements,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view = unsafe {
            device
                .bind_image_memory(image, memory, 0)
                .and_then(|()| {
                    let view_info = vk::ImageViewCreateInfo::default()
                        .image(image)
                        .view_type(vk::ImageViewType::TYPE_2D)
                        .format(desc.format)
                        .subresource_range(
                            vk::ImageSubresourceRange::default()
                                .aspect_mask(desc.aspect)
                                .base_mip_level(0)
                                .level_count(1)
                                .base_array_layer(0)
                                .layer_count(1),
                        );
                    device.create_image_view(&view_info, None)
                })
        };
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            device,
            view,
            image,
            memory,
            format: desc.format,
            extent: desc.extent,
            samples: desc.samples,
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

fn allocate(
    device: &ash::Device,
    ctx: &DeviceContext,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type = find_memory_type(
        requirements.memory_type_bits,
        properties,
        ctx.memory_properties(),
    )?;
    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);

    Ok(unsafe { device.allocate_memory(&alloc_info, None)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in props.memory_types.iter_mut().zip(flags) {
            slot.property_flags = property_flags;
        }
        props
    }

    #[test]
    fn memory_type_matches_bits_and_flags() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(0b111, host, &props).unwrap(), 2);
        assert_eq!(
            find_memory_type(0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL, &props).unwrap(),
            0
        );
        // Type 1 is host-visible but excluded by the bits
        assert_eq!(
            find_memory_type(0b100, vk::MemoryPropertyFlags::HOST_VISIBLE, &props).unwrap(),
            2
        );
    }

    #[test]
    fn memory_type_missing_is_an_error() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(0b1, vk::MemoryPropertyFlags::HOST_VISIBLE, &props);
        assert!(matches!(err, Err(GpuError::NoSuitableMemoryType { .. })));

        // Types past memory_type_count are never considered
        let err = find_memory_type(0b10, vk::MemoryPropertyFlags::empty(), &props);
        assert!(err.is_err());
    }

    #[test]
    fn buffers_share_with_dedicated_transfer() {
        let dedicated = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(0),
            transfer: Some(2),
        };
        let policy = SharingPolicy::for_buffers(&dedicated);
        assert_eq!(policy.mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(policy.queue_families(), &[0, 2]);

        let shared = QueueFamilyIndices {
            transfer: Some(0),
            ..dedicated
        };
        assert_eq!(SharingPolicy::for_buffers(&shared), SharingPolicy::Exclusive);
        assert!(SharingPolicy::Exclusive.queue_families().is_empty());
    }

    #[test]
    fn swapchain_shares_with_separate_present() {
        let split = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(1),
            transfer: None,
        };
        assert_eq!(
            SharingPolicy::for_swapchain(&split),
            SharingPolicy::Concurrent(vec![0, 1])
        );

        let same = QueueFamilyIndices {
            present: Some(0),
            ..split
        };
        assert_eq!(SharingPolicy::for_swapchain(&same), SharingPolicy::Exclusive);
    }
}
