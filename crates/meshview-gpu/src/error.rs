//! GPU error types.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0} ({code})", code = .0.as_raw())]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be found or initialized.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No physical device at all.
    #[error("No Vulkan device found")]
    NoDevice,

    /// Devices exist but none meets the requirements.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Validation was requested but the layer is missing.
    #[error("Validation layer not available: {0}")]
    ValidationLayerUnavailable(String),

    /// None of the candidate formats is supported.
    #[error("No supported format among candidates: {0}")]
    UnsupportedFormat(String),

    /// No memory type matches the requested properties.
    #[error("No suitable memory type (type bits {type_bits:#x}, properties {properties:?})")]
    NoSuitableMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// Image layout transition with no known barrier.
    #[error("Unsupported layout transition: {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader bytecode could not be read.
    #[error("Failed to read shader {}: {source}", path.display())]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Shader compilation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_errors_carry_numeric_code() {
        let err = GpuError::from(vk::Result::ERROR_DEVICE_LOST);
        assert!(err.to_string().contains("-4"));
    }
}
