//! Logical device and queue management.

use crate::capabilities::GpuCapabilities;
use crate::device::{find_depth_format, select_physical_device, DeviceRequirements, QueueFamilyIndices};
use crate::error::{GpuError, Result};
use crate::instance::validation_layers;
use crate::memory::SharingPolicy;
use crate::surface::Surface;
use ash::vk;
use parking_lot::Mutex;
use std::ffi::c_char;
use std::sync::Arc;

/// A device queue with externally synchronized access.
///
/// Submission, presentation and idle waits all take the lock, so several
/// producers can share one queue handle.
pub struct Queue {
    queue: Mutex<vk::Queue>,
    family: u32,
}

impl Queue {
    fn new(queue: vk::Queue, family: u32) -> Self {
        Self {
            queue: Mutex::new(queue),
            family,
        }
    }

    /// Queue family this queue belongs to.
    pub fn family(&self) -> u32 {
        self.family
    }

    /// Raw handle, for code that synchronizes on its own.
    pub fn handle(&self) -> vk::Queue {
        *self.queue.lock()
    }

    /// Submit work to the queue.
    ///
    /// # Safety
    /// All handles referenced by `submits` must be valid.
    pub unsafe fn submit(
        &self,
        device: &ash::Device,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<()> {
        let queue = self.queue.lock();
        device.queue_submit(*queue, submits, fence)?;
        Ok(())
    }

    /// Present, returning whether the swapchain is suboptimal.
    ///
    /// Errors are returned raw so the caller can recover from `ERROR_OUT_OF_DATE_KHR`.
    ///
    /// # Safety
    /// All handles referenced by `present_info` must be valid.
    pub unsafe fn present(
        &self,
        loader: &ash::khr::swapchain::Device,
        present_info: &vk::PresentInfoKHR<'_>,
    ) -> std::result::Result<bool, vk::Result> {
        let queue = self.queue.lock();
        loader.queue_present(*queue, present_info)
    }

    /// Block until the queue has no pending work.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait_idle(&self, device: &ash::Device) -> Result<()> {
        let queue = self.queue.lock();
        device.queue_wait_idle(*queue)?;
        Ok(())
    }
}

/// Selected physical device, logical device and its queues.
pub struct DeviceContext {
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) properties: vk::PhysicalDeviceProperties,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) instance: ash::Instance,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) queue_families: QueueFamilyIndices,
    pub(crate) graphics_queue: Queue,
    pub(crate) present_queue: Queue,
    pub(crate) transfer_queue: Queue,
    pub(crate) msaa_samples: vk::SampleCountFlags,
    pub(crate) depth_format: vk::Format,
}

impl DeviceContext {
    /// Select a physical device and open a logical device on it.
    ///
    /// One queue is created per unique family among graphics, present and
    /// transfer. Transfer aliases graphics when no distinct family exists.
    pub fn new(
        instance: &ash::Instance,
        requirements: &DeviceRequirements,
        surface: Option<&Surface>,
        enable_validation: bool,
    ) -> Result<Self> {
        let selected = unsafe { select_physical_device(instance, requirements, surface)? };
        let physical_device = selected.physical_device;
        let queue_families = selected.queue_families;
        let capabilities = selected.capabilities;

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let (graphics_family, present_family) =
            match (queue_families.graphics, queue_families.present) {
                (Some(graphics), Some(present)) => (graphics, present),
                _ => {
                    return Err(GpuError::InvalidState(
                        "Selected device has incomplete queue families".to_string(),
                    ))
                }
            };
        let transfer_family = if queue_families.transfer_available() {
            queue_families.transfer.unwrap_or(graphics_family)
        } else {
            graphics_family
        };

        let queue_priority = 1.0_f32;
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(std::slice::from_ref(&queue_priority))
            })
            .collect();

        let extension_names: Vec<*const c_char> =
            requirements.extensions.iter().map(|ext| ext.as_ptr()).collect();

        // Device layers are deprecated but older loaders still read them
        let layers = if enable_validation {
            validation_layers()
        } else {
            vec![]
        };
        let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        let features = vk::PhysicalDeviceFeatures::default()
            .sample_rate_shading(requirements.sample_rate_shading);

        #[allow(deprecated)]
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };

        let (properties, memory_properties, depth_format) = unsafe {
            let properties = instance.get_physical_device_properties(physical_device);
            let memory_properties = instance.get_physical_device_memory_properties(physical_device);
            match find_depth_format(instance, physical_device) {
                Ok(format) => (properties, memory_properties, format),
                Err(e) => {
                    device.destroy_device(None);
                    return Err(e);
                }
            }
        };

        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(graphics_family, 0),
                device.get_device_queue(present_family, 0),
                device.get_device_queue(transfer_family, 0),
            )
        };

        let msaa_samples = capabilities.max_msaa_samples;
        tracing::debug!(
            "Device ready: graphics {graphics_family}, present {present_family}, transfer {transfer_family}, {msaa_samples:?} MSAA, depth {depth_format:?}"
        );

        Ok(Self {
            physical_device,
            properties,
            memory_properties,
            device: Arc::new(device),
            instance: instance.clone(),
            capabilities,
            queue_families,
            graphics_queue: Queue::new(graphics_queue, graphics_family),
            present_queue: Queue::new(present_queue, present_family),
            transfer_queue: Queue::new(transfer_queue, transfer_family),
            msaa_samples,
            depth_format,
        })
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }

    /// Get the instance the device was created from.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    pub fn graphics_queue(&self) -> &Queue {
        &self.graphics_queue
    }

    pub fn present_queue(&self) -> &Queue {
        &self.present_queue
    }

    /// Transfer queue; the graphics queue's family when none is dedicated.
    pub fn transfer_queue(&self) -> &Queue {
        &self.transfer_queue
    }

    /// Maximum usable MSAA sample count.
    pub fn msaa_samples(&self) -> vk::SampleCountFlags {
        self.msaa_samples
    }

    /// Depth attachment format.
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Sharing mode for buffers touched by both graphics and transfer work.
    pub fn buffer_sharing(&self) -> SharingPolicy {
        SharingPolicy::for_buffers(&self.queue_families)
    }

    /// Sharing mode for swapchain images.
    pub fn swapchain_sharing(&self) -> SharingPolicy {
        SharingPolicy::for_swapchain(&self.queue_families)
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
        tracing::debug!("Logical device destroyed");
    }
}
