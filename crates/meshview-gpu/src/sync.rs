//! Synchronization primitives.

use crate::error::Result;
use ash::vk;
use std::sync::Arc;

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Frame synchronization resources.
pub struct FrameSync {
    device: Arc<ash::Device>,
    /// Semaphore signaled when image is available
    pub image_available: vk::Semaphore,
    /// Semaphore signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Fence to wait for frame completion, created signaled
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create frame synchronization resources.
    pub fn new(device: Arc<ash::Device>) -> Result<Self> {
        // Wrap as soon as possible so a later failure releases what exists
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            device,
        };
        unsafe {
            sync.image_available = create_semaphore(&sync.device)?;
            sync.render_finished = create_semaphore(&sync.device)?;
            sync.in_flight = create_fence(&sync.device, true)?;
        }
        Ok(sync)
    }

    /// Block until the GPU has finished this slot's last submission.
    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.in_flight], true, u64::MAX)?;
        }
        Ok(())
    }

    /// Reset the fence for the next submission.
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device.reset_fences(&[self.in_flight])?;
        }
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        // Null handles are ignored by the destroy calls
        unsafe {
            self.device.destroy_semaphore(self.image_available, None);
            self.device.destroy_semaphore(self.render_finished, None);
            self.device.destroy_fence(self.in_flight, None);
        }
    }
}

/// Frame slot ring plus the slot that last submitted each swapchain image.
///
/// Swapchain images are not handed out in slot order, so an acquired image
/// may still be in use by a different slot's submission. Before re-recording
/// an image's command buffer, wait on the slot returned by
/// [`FrameSlots::claim_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSlots {
    frames_in_flight: usize,
    current: usize,
    images_in_flight: Vec<Option<usize>>,
}

impl FrameSlots {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current: 0,
            images_in_flight: vec![None; image_count],
        }
    }

    /// Current slot index.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Move to the next slot.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames_in_flight;
    }

    /// Record that the current slot is about to use `image`.
    ///
    /// Returns the slot whose fence guarded the image until now, if any.
    pub fn claim_image(&mut self, image: usize) -> Option<usize> {
        let entry = self.images_in_flight.get_mut(image)?;
        entry.replace(self.current)
    }

    /// Forget image ownership after the swapchain was rebuilt.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight = vec![None; image_count];
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }
}

/// Manages synchronization for multiple frames in flight.
pub struct FrameSyncManager {
    frame_syncs: Vec<FrameSync>,
    slots: FrameSlots,
}

impl FrameSyncManager {
    /// Create a sync manager for the given number of frames in flight.
    pub fn new(device: &Arc<ash::Device>, frames_in_flight: usize, image_count: usize) -> Result<Self> {
        let mut frame_syncs = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            frame_syncs.push(FrameSync::new(device.clone())?);
        }

        Ok(Self {
            frame_syncs,
            slots: FrameSlots::new(frames_in_flight, image_count),
        })
    }

    /// Get the current frame's sync resources.
    pub fn current(&self) -> &FrameSync {
        &self.frame_syncs[self.slots.current()]
    }

    /// Sync resources of an arbitrary slot.
    pub fn get(&self, slot: usize) -> Option<&FrameSync> {
        self.frame_syncs.get(slot)
    }

    /// Advance to the next frame.
    pub fn advance(&mut self) {
        self.slots.advance();
    }

    /// Get the current frame index.
    pub fn current_frame(&self) -> usize {
        self.slots.current()
    }

    pub fn slots(&self) -> &FrameSlots {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut FrameSlots {
        &mut self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cycle_modulo_frames_in_flight() {
        let mut slots = FrameSlots::new(MAX_FRAMES_IN_FLIGHT, 3);
        let seen: Vec<usize> = (0..5)
            .map(|_| {
                let current = slots.current();
                slots.advance();
                current
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn claiming_reports_previous_owner() {
        let mut slots = FrameSlots::new(2, 3);

        // Slot 0 takes image 2 first; nothing to wait on
        assert_eq!(slots.claim_image(2), None);
        slots.advance();

        // Slot 1 gets the same image back: it must wait on slot 0's fence
        assert_eq!(slots.claim_image(2), Some(0));
        slots.advance();

        assert_eq!(slots.claim_image(0), None);
        assert_eq!(slots.claim_image(2), Some(1));
    }

    #[test]
    fn out_of_range_images_are_ignored() {
        let mut slots = FrameSlots::new(2, 2);
        assert_eq!(slots.claim_image(5), None);
    }

    #[test]
    fn rebuild_forgets_ownership() {
        let mut slots = FrameSlots::new(2, 2);
        slots.claim_image(1);
        slots.reset_images(4);
        assert_eq!(slots.image_count(), 4);
        assert_eq!(slots.claim_image(1), None);
    }
}
