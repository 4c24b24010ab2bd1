//! Vulkan frame lifecycle and resource orchestration for the meshview viewer.
//!
//! This crate provides:
//! - Instance, device selection and logical device management
//! - Swapchain negotiation and full rebuild on resize
//! - The MSAA render pass and mesh pipeline
//! - Staged mesh uploads with dedicated allocations
//! - Per-image command recording with an optional UI overlay sub-pass
//! - The [`Engine`] driving the frame loop

pub mod capabilities;
pub mod command;
pub mod context;
pub mod debug;
pub mod descriptors;
pub mod device;
pub mod engine;
pub mod error;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod overlay;
pub mod pipeline;
pub mod recorder;
pub mod render_pass;
pub mod resources;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod uniforms;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::{CommandPool, CommandPools};
pub use context::{DeviceContext, Queue};
pub use descriptors::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder};
pub use device::{DeviceRequirements, QueueFamilyIndices};
pub use engine::{Engine, EngineConfig, StateChanges};
pub use error::{GpuError, Result};
pub use frame::FrameTargets;
pub use memory::{GpuBuffer, GpuImage, SharingPolicy};
pub use overlay::OverlayRenderer;
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
pub use resources::MeshBuffers;
pub use surface::Surface;
pub use swapchain::Swapchain;
pub use sync::{FrameSlots, FrameSync, FrameSyncManager, MAX_FRAMES_IN_FLIGHT};
pub use uniforms::{UniformBuffer, UniformBufferObject};
