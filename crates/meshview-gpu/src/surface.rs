//! Surface management for windowed rendering.
//!
//! The windowing layer creates the raw surface (usually through
//! [`create_surface`]) and hands it to the engine, which wraps it in a
//! [`Surface`] that owns and eventually destroys it.

use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;

/// Instance extensions the platform needs to present to `display`.
pub fn required_extensions<D>(display: &D) -> Result<Vec<&'static CStr>>
where
    D: HasDisplayHandle,
{
    let display = display
        .display_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
    let names = ash_window::enumerate_required_extensions(display.as_raw())?;
    // The loader hands out pointers to static, nul-terminated names
    Ok(names
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) })
        .collect())
}

/// Create a raw Vulkan surface for a window.
///
/// # Safety
/// The instance must have been created with the extensions reported by
/// `ash_window::enumerate_required_extensions` for this window's display.
pub unsafe fn create_surface<W>(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &W,
) -> Result<vk::SurfaceKHR>
where
    W: HasDisplayHandle + HasWindowHandle,
{
    let display = window
        .display_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
    let window_handle = window
        .window_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

    ash_window::create_surface(
        entry,
        instance,
        display.as_raw(),
        window_handle.as_raw(),
        None,
    )
    .map_err(|e| GpuError::SurfaceCreation(e.to_string()))
}

/// Owned presentable surface.
pub struct Surface {
    surface: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Take ownership of a surface created on `instance`.
    pub fn new(entry: &ash::Entry, instance: &ash::Instance, surface: vk::SurfaceKHR) -> Self {
        Self {
            surface,
            loader: ash::khr::surface::Instance::new(entry, instance),
        }
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }

    /// Whether `queue_family` on `physical_device` can present to this surface.
    ///
    /// # Safety
    /// The physical device must come from the instance owning the surface.
    pub unsafe fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> bool {
        self.loader
            .get_physical_device_surface_support(physical_device, queue_family, self.surface)
            .unwrap_or(false)
    }

    /// Query surface capabilities.
    ///
    /// # Safety
    /// The physical device must come from the instance owning the surface.
    pub unsafe fn support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        let capabilities = self
            .loader
            .get_physical_device_surface_capabilities(physical_device, self.surface)?;

        let formats = self
            .loader
            .get_physical_device_surface_formats(physical_device, self.surface)?;

        let present_modes = self
            .loader
            .get_physical_device_surface_present_modes(physical_device, self.surface)?;

        Ok(SurfaceSupport {
            capabilities,
            formats,
            present_modes,
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

/// Surface capabilities query result.
pub struct SurfaceSupport {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// A swapchain can only be built with at least one format and mode.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adequacy_needs_formats_and_modes() {
        let mut support = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: Vec::new(),
        };
        assert!(!support.is_adequate());

        support.present_modes.push(vk::PresentModeKHR::FIFO);
        assert!(support.is_adequate());
    }
}
