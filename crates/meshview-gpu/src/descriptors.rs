//! Descriptor set management.

use crate::error::{GpuError, Result};
use ash::vk;
use std::sync::Arc;

/// Binding of the per-image uniform buffer.
pub const UNIFORM_BINDING: u32 = 0;

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'a>] {
        &self.bindings
    }

    /// Build the descriptor set layout.
    pub fn build(self, device: Arc<ash::Device>) -> Result<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };
        Ok(DescriptorSetLayout { device, layout })
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Layout used by the mesh pipeline: one uniform buffer read by the vertex stage.
pub fn mesh_layout_builder() -> DescriptorSetLayoutBuilder<'static> {
    DescriptorSetLayoutBuilder::new().uniform_buffer(UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX)
}

/// Owned descriptor set layout.
pub struct DescriptorSetLayout {
    device: Arc<ash::Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Pool sizes for `set_count` sets of one uniform buffer each.
pub fn uniform_pool_sizes(set_count: u32) -> [vk::DescriptorPoolSize; 1] {
    [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: set_count,
    }]
}

/// Descriptor pool for allocating descriptor sets.
///
/// Sets are released together with the pool.
pub struct DescriptorPool {
    device: Arc<ash::Device>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a new descriptor pool.
    pub fn new(
        device: Arc<ash::Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        if max_sets == 0 {
            return Err(GpuError::InvalidState(
                "Descriptor pool needs at least one set".to_string(),
            ));
        }

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&create_info, None)? };
        Ok(Self { device, pool })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate one set per entry of `layouts`.
    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> Result<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Point `set`'s uniform binding at the whole of `buffer`.
///
/// # Safety
/// The set must not be in use by a pending command buffer.
pub unsafe fn write_uniform_buffer(
    device: &ash::Device,
    set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: u64,
) {
    let buffer_info = [vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(range)];

    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(&buffer_info);

    device.update_descriptor_sets(&[write], &[]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_layout_has_single_vertex_uniform() {
        let builder = mesh_layout_builder();
        let [binding] = builder.bindings() else {
            panic!("expected exactly one binding");
        };
        assert_eq!(binding.binding, UNIFORM_BINDING);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn pool_is_sized_per_image() {
        let [size] = uniform_pool_sizes(3);
        assert_eq!(size.ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(size.descriptor_count, 3);
    }
}
