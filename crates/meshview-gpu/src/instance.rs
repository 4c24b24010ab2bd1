//! Vulkan instance creation.

use crate::debug::{messenger_create_info, DebugMessenger};
use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{c_char, CStr, CString};

/// Application name reported to the driver.
pub const APP_NAME: &str = "meshview";

/// Validation layers to enable when validation is on.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Load the Vulkan loader library.
pub fn load_entry() -> Result<ash::Entry> {
    unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))
}

/// First required name that is not in `available`.
pub fn first_missing<'a>(available: &[&CStr], required: &[&'a CStr]) -> Option<&'a CStr> {
    required
        .iter()
        .copied()
        .find(|name| !available.contains(name))
}

/// Instance plus the loader entry and the optional debug messenger.
///
/// Dropping it destroys the messenger before the instance.
pub struct VulkanInstance {
    debug: Option<DebugMessenger>,
    instance: ash::Instance,
    entry: ash::Entry,
}

impl VulkanInstance {
    /// Create an instance enabling `extensions`.
    ///
    /// With validation on, the Khronos validation layer must be present and
    /// `VK_EXT_debug_utils` is added so messages reach the log.
    pub fn new(
        entry: ash::Entry,
        app_name: &str,
        extensions: &[CString],
        enable_validation: bool,
    ) -> Result<Self> {
        let layers = if enable_validation {
            validation_layers()
        } else {
            vec![]
        };

        // Check that requested layers are available
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        let available_layer_names: Vec<&CStr> = available_layers
            .iter()
            .map(|props| unsafe { CStr::from_ptr(props.layer_name.as_ptr()) })
            .collect();
        if let Some(missing) = first_missing(&available_layer_names, &layers) {
            tracing::error!("Validation layer {:?} not available", missing);
            return Err(GpuError::ValidationLayerUnavailable(
                missing.to_string_lossy().into_owned(),
            ));
        }

        let mut extension_names: Vec<&CStr> = Vec::with_capacity(extensions.len() + 2);
        let extra = [
            enable_validation.then_some(ash::ext::debug_utils::NAME),
            cfg!(target_os = "macos").then_some(ash::khr::portability_enumeration::NAME),
        ];
        for name in extensions
            .iter()
            .map(CString::as_c_str)
            .chain(extra.into_iter().flatten())
        {
            if !extension_names.contains(&name) {
                extension_names.push(name);
            }
        }

        // Check that every extension is offered by the loader
        let available_extensions = unsafe { entry.enumerate_instance_extension_properties(None)? };
        let available_extension_names: Vec<&CStr> = available_extensions
            .iter()
            .map(|props| unsafe { CStr::from_ptr(props.extension_name.as_ptr()) })
            .collect();
        if let Some(missing) = first_missing(&available_extension_names, &extension_names) {
            tracing::error!("Instance extension {:?} not supported", missing);
            return Err(GpuError::ExtensionNotSupported(
                missing.to_string_lossy().into_owned(),
            ));
        }

        let app_name = CString::new(app_name)
            .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&app_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_ptrs: Vec<*const c_char> = extension_names.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        // Required for MoltenVK on macOS
        #[cfg(target_os = "macos")]
        let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        #[cfg(not(target_os = "macos"))]
        let create_flags = vk::InstanceCreateFlags::empty();

        // Also report problems in instance creation itself
        let mut debug_info = messenger_create_info();
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs)
            .flags(create_flags);
        if enable_validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let debug = if enable_validation {
            match unsafe { DebugMessenger::new(&entry, &instance) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        tracing::info!(
            "Vulkan instance created ({} extensions, validation {})",
            extension_ptrs.len(),
            if enable_validation { "on" } else { "off" }
        );

        Ok(Self {
            debug,
            instance,
            entry,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Whether validation output is being forwarded.
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        self.debug = None;
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_names_are_reported_in_order() {
        let available = [c"VK_KHR_surface", c"VK_KHR_xlib_surface"];
        assert_eq!(first_missing(&available, &[c"VK_KHR_surface"]), None);
        assert_eq!(
            first_missing(
                &available,
                &[c"VK_KHR_surface", c"VK_EXT_debug_utils", c"VK_KHR_wayland_surface"]
            ),
            Some(c"VK_EXT_debug_utils")
        );
    }

    #[test]
    fn validation_uses_khronos_layer() {
        assert_eq!(validation_layers(), vec![c"VK_LAYER_KHRONOS_validation"]);
    }
}
