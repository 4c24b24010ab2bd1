//! Swapchain management.

use crate::context::{DeviceContext, Queue};
use crate::error::{GpuError, Result};
use crate::surface::Surface;
use ash::vk;
use std::sync::Arc;

/// Format used when the surface has no preference.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Swapchain wrapper.
///
/// Owns the image views and the chain; the images belong to the chain.
pub struct Swapchain {
    device: Arc<ash::Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Negotiate format, present mode and extent with the surface and create
    /// the chain plus one view per image.
    pub fn new(
        ctx: &DeviceContext,
        surface: &Surface,
        window_extent: vk::Extent2D,
        vsync: bool,
    ) -> Result<Self> {
        let support = unsafe { surface.support(ctx.physical_device())? };
        if !support.is_adequate() {
            return Err(GpuError::SwapchainCreation(
                "Surface reports no formats or present modes".to_string(),
            ));
        }

        let format = select_surface_format(&support.formats);
        let present_mode = select_present_mode(&support.present_modes, vsync);
        let extent = calculate_extent(
            &support.capabilities,
            window_extent.width,
            window_extent.height,
        );
        let image_count = select_image_count(&support.capabilities);

        let sharing = ctx.swapchain_sharing();
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing.mode())
            .queue_family_indices(sharing.queue_families())
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let device = ctx.device().clone();
        let loader = ash::khr::swapchain::Device::new(ctx.instance(), &device);
        let swapchain = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?
        };

        // Owned from here on, so early returns release what exists
        let mut chain = Self {
            device,
            loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            format,
            present_mode,
            extent,
        };

        chain.images = unsafe { chain.loader.get_swapchain_images(swapchain)? };
        for &image in &chain.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );
            let view = unsafe { chain.device.create_image_view(&view_info, None)? };
            chain.image_views.push(view);
        }

        tracing::info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            chain.images.len(),
            format.format,
            present_mode
        );

        Ok(chain)
    }

    pub fn loader(&self) -> &ash::khr::swapchain::Device {
        &self.loader
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Acquire the next image.
    ///
    /// Returns the image index and whether the chain is suboptimal.
    /// `ERROR_OUT_OF_DATE_KHR` comes back as `GpuError::Vulkan` and means no
    /// image was acquired.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool)> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        result.map_err(GpuError::from)
    }

    /// Present an image.
    ///
    /// Returns `true` when the chain needs rebuilding (suboptimal or out of date).
    pub fn present(
        &self,
        queue: &Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { queue.present(&self.loader, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::from(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Select the surface format.
///
/// A lone `UNDEFINED` entry means any format works.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    match available {
        [] => PREFERRED_SURFACE_FORMAT,
        [only] if only.format == vk::Format::UNDEFINED => PREFERRED_SURFACE_FORMAT,
        _ => available
            .iter()
            .copied()
            .find(|candidate| is_preferred(candidate))
            .unwrap_or(available[0]),
    }
}

fn is_preferred(format: &vk::SurfaceFormatKHR) -> bool {
    format.format == PREFERRED_SURFACE_FORMAT.format
        && format.color_space == PREFERRED_SURFACE_FORMAT.color_space
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        // FIFO is always supported
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One image more than the minimum, capped when the surface sets a maximum.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        image_count.min(capabilities.max_image_count)
    } else {
        image_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn clamping_capabilities() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> (u32, u32) {
        (width, height)
    }

    fn pair(extent: vk::Extent2D) -> (u32, u32) {
        (extent.width, extent.height)
    }

    #[test]
    fn undefined_format_falls_back_to_bgra_unorm() {
        let available = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let chosen = select_surface_format(&available);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn preferred_format_wins_over_order() {
        let available = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            PREFERRED_SURFACE_FORMAT,
        ];
        assert!(is_preferred(&select_surface_format(&available)));

        let other = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(select_surface_format(&other).format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn present_mode_preference_order() {
        use vk::PresentModeKHR as Mode;
        assert_eq!(select_present_mode(&[Mode::FIFO, Mode::MAILBOX], false), Mode::MAILBOX);
        assert_eq!(select_present_mode(&[Mode::FIFO, Mode::IMMEDIATE], false), Mode::IMMEDIATE);
        assert_eq!(
            select_present_mode(&[Mode::IMMEDIATE, Mode::MAILBOX, Mode::FIFO], false),
            Mode::MAILBOX
        );
        assert_eq!(select_present_mode(&[Mode::FIFO], false), Mode::FIFO);
        assert_eq!(select_present_mode(&[Mode::FIFO, Mode::MAILBOX], true), Mode::FIFO);
    }

    #[test]
    fn extent_is_clamped_when_surface_defers() {
        let caps = clamping_capabilities();
        assert_eq!(pair(calculate_extent(&caps, 10, 10)), extent(64, 64));
        assert_eq!(pair(calculate_extent(&caps, 8000, 8000)), extent(4096, 4096));
        assert_eq!(pair(calculate_extent(&caps, 800, 600)), extent(800, 600));
    }

    #[test]
    fn current_extent_is_used_verbatim() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..clamping_capabilities()
        };
        assert_eq!(pair(calculate_extent(&caps, 10, 10)), extent(1280, 720));
    }

    #[test]
    fn image_count_respects_maximum() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(select_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(select_image_count(&caps), 2);
    }
}
