//! Hook for an immediate-mode UI drawn in the overlay sub-pass.

use crate::error::Result;
use ash::vk;

/// Records UI draw data on top of the scene.
///
/// The engine calls [`prepare`](Self::prepare) after every render pass
/// (re)build and [`record`](Self::record) once per frame inside the overlay
/// sub-pass, with the primary command buffer in recording state.
pub trait OverlayRenderer {
    /// Logical size of the UI in pixels. Zero area skips recording.
    fn display_size(&self) -> [f32; 2];

    /// Rebuild render-pass dependent state, such as the UI pipeline.
    fn prepare(
        &mut self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        subpass: u32,
        samples: vk::SampleCountFlags,
    ) -> Result<()> {
        let _ = (device, render_pass, subpass, samples);
        Ok(())
    }

    /// Record this frame's draw commands into `cmd`.
    fn record(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()>;
}

/// Whether an overlay of this size has anything to draw.
pub fn has_drawable_area(display_size: [f32; 2]) -> bool {
    display_size[0] > 0.0 && display_size[1] > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_overlays_are_skipped() {
        assert!(has_drawable_area([1280.0, 720.0]));
        assert!(!has_drawable_area([0.0, 720.0]));
        assert!(!has_drawable_area([1280.0, 0.0]));
        assert!(!has_drawable_area([-1.0, -1.0]));
    }
}
