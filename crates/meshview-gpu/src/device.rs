//! Physical device selection and queue family discovery.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::surface::Surface;
use ash::vk;
use std::ffi::CStr;

/// Depth formats tried for the depth attachment, best first.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Queue family indices used by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    /// Graphics and present are both needed to draw anything.
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// A transfer family exists and is not the graphics one.
    pub fn transfer_available(&self) -> bool {
        self.transfer.is_some() && self.transfer != self.graphics
    }

    /// Distinct families in graphics, present, transfer order.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for family in [self.graphics, self.present, self.transfer]
            .into_iter()
            .flatten()
        {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// Scan queue families in one pass.
///
/// Graphics and present take the first family offering them. Transfer takes
/// the first family that offers transfer without being the graphics family,
/// falling back to the first transfer-capable family. The scan stops once
/// graphics and present are known and a distinct transfer family is found.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        if family.queue_count == 0 {
            continue;
        }
        let i = i as u32;

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(i);
        }

        if family.queue_flags.contains(vk::QueueFlags::TRANSFER) {
            match indices.transfer {
                None => indices.transfer = Some(i),
                Some(_) if !indices.transfer_available() && Some(i) != indices.graphics => {
                    indices.transfer = Some(i);
                }
                Some(_) => {}
            }
        }

        if indices.present.is_none() && supports_present(i) {
            indices.present = Some(i);
        }

        if indices.is_complete() && indices.transfer_available() {
            break;
        }
    }

    indices
}

/// Whether a depth format carries a stencil aspect.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Whether format properties support `features` under `tiling`.
pub fn format_supports(
    properties: &vk::FormatProperties,
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> bool {
    match tiling {
        vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
        vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
        _ => false,
    }
}

/// First candidate format supporting `features` with `tiling`.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn find_supported_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let properties =
                instance.get_physical_device_format_properties(physical_device, format);
            format_supports(&properties, tiling, features)
        })
        .ok_or_else(|| GpuError::UnsupportedFormat(format!("{candidates:?}")))
}

/// Pick the depth attachment format.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn find_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format> {
    find_supported_format(
        instance,
        physical_device,
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

/// What a physical device must offer to be picked.
#[derive(Debug, Clone)]
pub struct DeviceRequirements {
    pub extensions: Vec<&'static CStr>,
    pub sample_rate_shading: bool,
    /// Only accept `DISCRETE_GPU` devices.
    pub require_discrete: bool,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            extensions: vec![ash::khr::swapchain::NAME],
            sample_rate_shading: true,
            require_discrete: true,
        }
    }
}

impl DeviceRequirements {
    /// Requirements for a device that never presents.
    pub fn headless() -> Self {
        Self {
            extensions: Vec::new(),
            sample_rate_shading: false,
            require_discrete: false,
        }
    }

    pub fn require_discrete(mut self, require: bool) -> Self {
        self.require_discrete = require;
        self
    }

    /// Reason the device is rejected, or `None` when it qualifies.
    pub fn rejection(&self, capabilities: &GpuCapabilities) -> Option<String> {
        if self.require_discrete && capabilities.device_type != vk::PhysicalDeviceType::DISCRETE_GPU
        {
            return Some(format!("not a discrete GPU ({:?})", capabilities.device_type));
        }
        if self.sample_rate_shading && !capabilities.supports_sample_rate_shading {
            return Some("sampleRateShading not supported".to_string());
        }
        if let Some(missing) = self
            .extensions
            .iter()
            .find(|&&ext| !capabilities.supports_extensions(&[ext]))
        {
            return Some(format!("missing extension {missing:?}"));
        }
        None
    }
}

/// A physical device that passed selection.
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilyIndices,
    pub capabilities: GpuCapabilities,
}

/// Pick the first physical device meeting `requirements`.
///
/// Without a surface the present family is the graphics family and the
/// surface checks are skipped.
///
/// # Safety
/// The instance must be valid and own the surface.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    requirements: &DeviceRequirements,
    surface: Option<&Surface>,
) -> Result<SelectedDevice> {
    let devices = instance.enumerate_physical_devices()?;
    if devices.is_empty() {
        tracing::error!("No Vulkan device found");
        return Err(GpuError::NoDevice);
    }

    for physical_device in devices {
        let capabilities = GpuCapabilities::query(instance, physical_device);

        if let Some(reason) = requirements.rejection(&capabilities) {
            tracing::debug!("Rejected {}: {}", capabilities.device_name, reason);
            continue;
        }

        if let Some(surface) = surface {
            match surface.support(physical_device) {
                Ok(support) if support.is_adequate() => {}
                Ok(_) => {
                    tracing::debug!(
                        "Rejected {}: no surface formats or present modes",
                        capabilities.device_name
                    );
                    continue;
                }
                Err(e) => {
                    tracing::debug!(
                        "Rejected {}: surface query failed: {}",
                        capabilities.device_name,
                        e
                    );
                    continue;
                }
            }
        }

        let families = instance.get_physical_device_queue_family_properties(physical_device);
        let queue_families = find_queue_families(&families, |family| match surface {
            Some(surface) => surface.supports_present(physical_device, family),
            None => families[family as usize]
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS),
        });
        if !queue_families.is_complete() {
            tracing::debug!(
                "Rejected {}: incomplete queue families {:?}",
                capabilities.device_name,
                queue_families
            );
            continue;
        }

        tracing::debug!(
            "Queue families for {}: {:?}",
            capabilities.device_name,
            queue_families
        );
        return Ok(SelectedDevice {
            physical_device,
            queue_families,
            capabilities,
        });
    }

    tracing::error!("No device meets the requirements");
    Err(GpuError::NoSuitableDevice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    const ALL: vk::QueueFlags = vk::QueueFlags::from_raw(
        vk::QueueFlags::GRAPHICS.as_raw()
            | vk::QueueFlags::COMPUTE.as_raw()
            | vk::QueueFlags::TRANSFER.as_raw(),
    );

    #[test]
    fn single_family_serves_everything() {
        let families = [family(ALL, 16)];
        let indices = find_queue_families(&families, |_| true);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.transfer, Some(0));
        assert!(indices.is_complete());
        assert!(!indices.transfer_available());
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn dedicated_transfer_family_is_preferred() {
        let families = [
            family(ALL, 16),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 8),
            family(vk::QueueFlags::TRANSFER, 2),
        ];
        let indices = find_queue_families(&families, |i| i == 0);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.transfer, Some(1));
        assert!(indices.transfer_available());
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [family(ALL, 0), family(vk::QueueFlags::GRAPHICS, 1)];
        let indices = find_queue_families(&families, |_| true);
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.transfer, None);
        assert!(!indices.transfer_available());
    }

    #[test]
    fn separate_present_family() {
        let families = [family(ALL, 1), family(vk::QueueFlags::COMPUTE, 1)];
        let indices = find_queue_families(&families, |i| i == 1);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn missing_present_is_incomplete() {
        let families = [family(ALL, 4)];
        let indices = find_queue_families(&families, |_| false);
        assert!(!indices.is_complete());
    }

    #[test]
    fn stencil_detection() {
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn format_features_respect_tiling() {
        let properties = vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        let depth = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert!(format_supports(&properties, vk::ImageTiling::OPTIMAL, depth));
        assert!(!format_supports(&properties, vk::ImageTiling::LINEAR, depth));
    }

    #[test]
    fn requirements_reject_with_reason() {
        let caps = GpuCapabilities {
            vendor: crate::capabilities::GpuVendor::Intel,
            device_name: "integrated".into(),
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            api_version: vk::API_VERSION_1_0,
            driver_version: 0,
            supports_sample_rate_shading: true,
            max_msaa_samples: vk::SampleCountFlags::TYPE_4,
            device_local_memory_mb: 512,
            available_extensions: ["VK_KHR_swapchain".to_string()].into_iter().collect(),
        };

        let strict = DeviceRequirements::default();
        assert!(strict.rejection(&caps).is_some_and(|r| r.contains("discrete")));

        let relaxed = DeviceRequirements::default().require_discrete(false);
        assert_eq!(relaxed.rejection(&caps), None);

        let no_shading = GpuCapabilities {
            supports_sample_rate_shading: false,
            ..caps
        };
        assert!(relaxed.rejection(&no_shading).is_some());
        assert_eq!(DeviceRequirements::headless().rejection(&no_shading), None);
    }
}
