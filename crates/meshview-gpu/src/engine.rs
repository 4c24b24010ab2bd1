//! The engine context object driving the frame loop.
//!
//! Lifecycle, in call order:
//! 1. [`Engine::new`] with a scene,
//! 2. [`Engine::add_required_extensions`] with the windowing layer's list,
//! 3. [`Engine::create_instance`], then surface creation by the caller,
//! 4. [`Engine::set_surface`] and [`Engine::init_vulkan`],
//! 5. [`Engine::resize_extent`] and [`Engine::draw_frame`] every poll,
//! 6. [`Engine::cleanup`], or just drop the engine.

use crate::command::CommandPools;
use crate::context::DeviceContext;
use crate::descriptors::{mesh_layout_builder, DescriptorSetLayout};
use crate::device::DeviceRequirements;
use crate::error::{GpuError, Result};
use crate::frame::{FrameTargets, TargetOptions};
use crate::instance::{load_entry, VulkanInstance, APP_NAME};
use crate::overlay::OverlayRenderer;
use crate::resources::MeshBuffers;
use crate::surface::Surface;
use crate::sync::{FrameSyncManager, MAX_FRAMES_IN_FLIGHT};
use crate::uniforms::UniformBufferObject;
use ash::vk;
use meshview_core::{Camera, Mesh, Scene};
use std::ffi::{CStr, CString};
use std::path::PathBuf;
use std::time::Instant;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Present with FIFO instead of the lowest-latency mode available.
    pub vsync: bool,
    /// Add a second sub-pass for a UI overlay.
    pub ui_overlay: bool,
    /// Directory holding `vertex.spv` and `fragment.spv`.
    pub shader_dir: PathBuf,
    /// Only accept discrete GPUs.
    pub require_discrete: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            validation: cfg!(debug_assertions),
            vsync: false,
            ui_overlay: true,
            shader_dir: meshview_shaders::shader_dir(),
            require_discrete: true,
        }
    }
}

impl EngineConfig {
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_ui_overlay(mut self, ui_overlay: bool) -> Self {
        self.ui_overlay = ui_overlay;
        self
    }

    pub fn with_shader_dir(mut self, shader_dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = shader_dir.into();
        self
    }

    pub fn with_require_discrete(mut self, require_discrete: bool) -> Self {
        self.require_discrete = require_discrete;
        self
    }
}

/// Pending application-side changes picked up by the next frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateChanges {
    pub model_modified: bool,
    pub material_modified: bool,
}

impl StateChanges {
    pub fn any(&self) -> bool {
        self.model_modified || self.material_modified
    }
}

/// Device-level state, dropped before the surface and instance.
///
/// Field order is teardown order.
struct Renderer {
    targets: Option<FrameTargets>,
    meshes: Vec<MeshBuffers>,
    sync: FrameSyncManager,
    descriptor_set_layout: DescriptorSetLayout,
    command_pools: CommandPools,
    device: DeviceContext,
}

impl Renderer {
    fn new(
        instance: &VulkanInstance,
        surface: &Surface,
        config: &EngineConfig,
        meshes: &[Mesh],
        options: &TargetOptions<'_>,
    ) -> Result<Self> {
        let requirements = DeviceRequirements::default().require_discrete(config.require_discrete);
        let device = DeviceContext::new(
            instance.instance(),
            &requirements,
            Some(surface),
            instance.validation_enabled(),
        )?;
        let command_pools = CommandPools::new(&device)?;
        let descriptor_set_layout = mesh_layout_builder().build(device.device().clone())?;
        let meshes = MeshBuffers::upload_all(&device, &command_pools, meshes)?;
        let sync = FrameSyncManager::new(device.device(), MAX_FRAMES_IN_FLIGHT, 0)?;

        let mut renderer = Self {
            targets: None,
            meshes,
            sync,
            descriptor_set_layout,
            command_pools,
            device,
        };
        renderer.rebuild(surface, options, None)?;
        Ok(renderer)
    }

    /// Drop and rebuild the frame targets.
    ///
    /// Returns `false` when the window has no area and the rebuild is deferred.
    fn rebuild(
        &mut self,
        surface: &Surface,
        options: &TargetOptions<'_>,
        overlay: Option<&mut (dyn OverlayRenderer + '_)>,
    ) -> Result<bool> {
        self.device.wait_idle()?;
        self.targets = None;

        let extent = options.window_extent;
        if extent.width == 0 || extent.height == 0 {
            tracing::debug!("Window has no area, deferring swapchain rebuild");
            return Ok(false);
        }

        let targets = FrameTargets::build(
            &self.device,
            surface,
            &self.command_pools,
            &self.descriptor_set_layout,
            options,
        )?;
        targets.record_geometry(self.device.device(), &self.meshes)?;
        if let Some(overlay) = overlay {
            targets.prepare_overlay(self.device.device(), overlay)?;
        }
        self.sync.slots_mut().reset_images(targets.image_count());
        self.targets = Some(targets);
        Ok(true)
    }

    /// Replace the GPU mirror of the scene and re-record geometry.
    fn replace_meshes(&mut self, meshes: &[Mesh]) -> Result<()> {
        self.device.wait_idle()?;
        self.meshes.clear();
        self.meshes = MeshBuffers::upload_all(&self.device, &self.command_pools, meshes)?;
        if let Some(targets) = &self.targets {
            targets.record_geometry(self.device.device(), &self.meshes)?;
        }
        tracing::info!("Model updated: {} meshes", self.meshes.len());
        Ok(())
    }

    /// Wait, acquire, record, submit, present and advance.
    ///
    /// Returns `true` when the swapchain must be rebuilt. An out-of-date
    /// swapchain at acquire returns early without advancing the slot.
    fn render_frame(
        &mut self,
        overlay: Option<&mut (dyn OverlayRenderer + '_)>,
        ubo: &UniformBufferObject,
    ) -> Result<bool> {
        let Some(targets) = self.targets.as_ref() else {
            return Ok(true);
        };
        let device = self.device.device();

        self.sync.current().wait()?;

        let acquired = targets
            .swapchain()
            .acquire_next_image(self.sync.current().image_available);
        let image_index = match acquired {
            Ok((index, _suboptimal)) => index,
            Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)) => return Ok(true),
            Err(e) => {
                tracing::error!("Failed to acquire swapchain image: {e}");
                return Err(e);
            }
        };
        let image = image_index as usize;

        // Swapchain images do not come back in slot order
        if let Some(previous) = self.sync.slots_mut().claim_image(image) {
            if let Some(owner) = self.sync.get(previous) {
                owner.wait()?;
            }
        }

        let cmd = targets.record_frame(device, image, overlay)?;
        targets.update_uniforms(image, ubo)?;

        let frame = self.sync.current();
        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.render_finished];
        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        frame.reset()?;
        unsafe {
            self.device
                .graphics_queue()
                .submit(device, &[submit_info], frame.in_flight)?;
        }

        let needs_rebuild = targets.swapchain().present(
            self.device.present_queue(),
            image_index,
            &signal_semaphores,
        )?;

        // Serializes frames on presentation; caps throughput but keeps the
        // present queue from running ahead of the semaphores.
        unsafe {
            self.device.present_queue().wait_idle(device)?;
        }
        self.sync.advance();

        Ok(needs_rebuild)
    }
}

/// Match the camera's aspect to the swapchain, which may differ from the
/// window size the surface reported.
fn sync_viewport(camera: &mut Camera, extent: Option<vk::Extent2D>) -> Option<vk::Extent2D> {
    let extent = extent?;
    camera.set_viewport_dimensions(extent.width, extent.height);
    Some(extent)
}

/// GPU engine for one window.
///
/// Field order is teardown order: the overlay, then device-level state,
/// then the surface and finally the instance.
pub struct Engine {
    overlay: Option<Box<dyn OverlayRenderer>>,
    renderer: Option<Renderer>,
    surface: Option<Surface>,
    instance: Option<VulkanInstance>,
    config: EngineConfig,
    extensions: Vec<CString>,
    meshes: Vec<Mesh>,
    camera: Camera,
    window_extent: vk::Extent2D,
    resize_pending: bool,
    changes: StateChanges,
    start_time: Option<Instant>,
    cleaned: bool,
}

impl Engine {
    /// Create an engine for `scene`. No Vulkan object exists yet.
    pub fn new(config: EngineConfig, scene: Scene) -> Self {
        let camera = scene.primary_camera();
        let (width, height) = camera.viewport_dimensions();
        Self {
            overlay: None,
            renderer: None,
            surface: None,
            instance: None,
            config,
            extensions: Vec::new(),
            meshes: scene.meshes,
            camera,
            window_extent: vk::Extent2D { width, height },
            resize_pending: false,
            changes: StateChanges::default(),
            start_time: None,
            cleaned: true,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Append instance extensions required by the windowing layer.
    pub fn add_required_extensions<'a>(&mut self, names: impl IntoIterator<Item = &'a CStr>) {
        for name in names {
            if !self.extensions.iter().any(|known| known.as_c_str() == name) {
                self.extensions.push(name.to_owned());
            }
        }
    }

    pub fn required_extensions(&self) -> &[CString] {
        &self.extensions
    }

    /// Load Vulkan and create the instance with the collected extensions.
    pub fn create_instance(&mut self) -> Result<()> {
        if self.instance.is_some() {
            return Err(GpuError::InvalidState(
                "Instance already created".to_string(),
            ));
        }

        let entry = load_entry()?;
        let instance = VulkanInstance::new(
            entry,
            &self.config.app_name,
            &self.extensions,
            self.config.validation,
        )
        .inspect_err(|e| tracing::error!("Failed to create Vulkan instance: {e}"))?;

        self.instance = Some(instance);
        self.cleaned = false;
        Ok(())
    }

    pub fn instance(&self) -> Result<&ash::Instance> {
        self.vulkan_instance().map(VulkanInstance::instance)
    }

    pub fn entry(&self) -> Result<&ash::Entry> {
        self.vulkan_instance().map(VulkanInstance::entry)
    }

    fn vulkan_instance(&self) -> Result<&VulkanInstance> {
        self.instance
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Instance not created".to_string()))
    }

    /// Take ownership of a surface created on this engine's instance.
    pub fn set_surface(&mut self, surface: vk::SurfaceKHR) -> Result<()> {
        if self.renderer.is_some() {
            return Err(GpuError::InvalidState(
                "Surface cannot change after init_vulkan".to_string(),
            ));
        }
        let instance = self.vulkan_instance()?;
        let surface = Surface::new(instance.entry(), instance.instance(), surface);
        self.surface = Some(surface);
        Ok(())
    }

    /// Select the device and build every resource needed to draw.
    pub fn init_vulkan(&mut self) -> Result<()> {
        if self.renderer.is_some() {
            return Err(GpuError::InvalidState(
                "Vulkan already initialized".to_string(),
            ));
        }
        let instance = self.vulkan_instance()?;
        let surface = self
            .surface
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("No surface set".to_string()))?;

        let options = TargetOptions {
            window_extent: self.window_extent,
            vsync: self.config.vsync,
            overlay_subpass: self.config.ui_overlay,
            shader_dir: &self.config.shader_dir,
        };
        let renderer = Renderer::new(instance, surface, &self.config, &self.meshes, &options)
            .inspect_err(|e| tracing::error!("Failed to initialize Vulkan: {e}"))?;

        if let (Some(targets), Some(overlay)) = (&renderer.targets, self.overlay.as_deref_mut()) {
            targets.prepare_overlay(renderer.device.device(), overlay)?;
        }
        sync_viewport(&mut self.camera, renderer.targets.as_ref().map(FrameTargets::extent));
        // Everything pending was uploaded above
        self.changes = StateChanges::default();
        self.resize_pending = false;
        self.renderer = Some(renderer);

        tracing::info!("Vulkan initialized");
        Ok(())
    }

    /// Record the window size seen by the windowing layer.
    pub fn resize_extent(&mut self, width: u32, height: u32) {
        if self.window_extent.width == width && self.window_extent.height == height {
            return;
        }
        self.window_extent = vk::Extent2D { width, height };
        self.resize_pending = true;
        self.camera.set_viewport_dimensions(width, height);
    }

    pub fn is_resize_pending(&self) -> bool {
        self.resize_pending
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
        let (width, height) = (self.window_extent.width, self.window_extent.height);
        self.camera.set_viewport_dimensions(width, height);
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Replace the meshes; uploaded at the start of the next frame.
    pub fn set_model(&mut self, meshes: Vec<Mesh>) {
        self.meshes = meshes;
        self.changes.model_modified = true;
    }

    /// Flag a material change for the next frame.
    pub fn mark_material_modified(&mut self) {
        self.changes.material_modified = true;
    }

    pub fn state_changes(&self) -> StateChanges {
        self.changes
    }

    /// Install the UI overlay recorder.
    pub fn set_overlay(&mut self, mut overlay: Box<dyn OverlayRenderer>) -> Result<()> {
        if let Some(renderer) = &self.renderer {
            if let Some(targets) = &renderer.targets {
                targets.prepare_overlay(renderer.device.device(), overlay.as_mut())?;
            }
        }
        self.overlay = Some(overlay);
        Ok(())
    }

    /// Render one frame.
    pub fn draw_frame(&mut self) -> Result<()> {
        let Self {
            overlay,
            renderer,
            surface,
            config,
            meshes,
            camera,
            window_extent,
            resize_pending,
            changes,
            start_time,
            ..
        } = self;

        let renderer = renderer
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Vulkan not initialized".to_string()))?;
        let surface = surface
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("No surface set".to_string()))?;
        let options = TargetOptions {
            window_extent: *window_extent,
            vsync: config.vsync,
            overlay_subpass: config.ui_overlay,
            shader_dir: &config.shader_dir,
        };

        if changes.model_modified {
            renderer.replace_meshes(meshes)?;
            changes.model_modified = false;
        }
        // No material system yet
        changes.material_modified = false;

        if renderer.targets.is_none() {
            *resize_pending = false;
            if !renderer.rebuild(surface, &options, overlay.as_deref_mut())? {
                return Ok(());
            }
            sync_viewport(camera, renderer.targets.as_ref().map(FrameTargets::extent));
        }

        let elapsed = start_time.get_or_insert_with(Instant::now).elapsed();
        let ubo = UniformBufferObject::new(camera, elapsed.as_secs_f32());

        let needs_rebuild = renderer.render_frame(overlay.as_deref_mut(), &ubo)?;
        if needs_rebuild || *resize_pending {
            *resize_pending = false;
            renderer.rebuild(surface, &options, overlay.as_deref_mut())?;
            let extent = renderer.targets.as_ref().map(FrameTargets::extent);
            if let Some(extent) = sync_viewport(camera, extent) {
                tracing::info!("Swapchain rebuilt: {}x{}", extent.width, extent.height);
            }
        }
        Ok(())
    }

    /// Release every Vulkan object in reverse creation order.
    ///
    /// Returns whether this call released anything. Safe to call repeatedly.
    pub fn cleanup(&mut self) -> bool {
        let mut released = false;

        if let Some(renderer) = self.renderer.as_ref() {
            if let Err(e) = renderer.device.wait_idle() {
                tracing::error!("Failed to wait for device idle: {e}");
            }
        }
        // Overlay state may reference device objects
        self.overlay = None;
        if let Some(renderer) = self.renderer.take() {
            drop(renderer);
            released = true;
        }
        if self.surface.take().is_some() {
            released = true;
        }
        if self.instance.take().is_some() {
            released = true;
        }

        if released {
            tracing::info!("Engine cleaned up");
        }
        self.cleaned = true;
        released
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned
    }

    /// Slot of the next frame.
    pub fn frame_index(&self) -> usize {
        self.renderer
            .as_ref()
            .map_or(0, |renderer| renderer.sync.current_frame())
    }

    pub fn image_count(&self) -> usize {
        self.targets().map_or(0, FrameTargets::image_count)
    }

    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.targets().map(FrameTargets::extent)
    }

    fn targets(&self) -> Option<&FrameTargets> {
        self.renderer.as_ref()?.targets.as_ref()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        let scene = Scene::new(vec![Mesh::quad()], Vec::new()).unwrap();
        Engine::new(EngineConfig::default(), scene)
    }

    #[test]
    fn config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.app_name, "meshview");
        assert_eq!(config.validation, cfg!(debug_assertions));
        assert!(config.ui_overlay);
        assert!(config.require_discrete);
        assert!(!config.vsync);
    }

    #[test]
    fn state_changes_start_clean() {
        let changes = StateChanges::default();
        assert!(!changes.any());
        let changes = StateChanges {
            material_modified: true,
            ..changes
        };
        assert!(changes.any());
    }

    #[test]
    fn set_model_marks_model_modified() {
        let mut engine = engine();
        engine.set_model(vec![Mesh::cube()]);
        assert!(engine.state_changes().model_modified);
        assert!(!engine.state_changes().material_modified);
    }

    #[test]
    fn resize_only_flags_real_changes() {
        let mut engine = engine();
        let (width, height) = engine.camera().viewport_dimensions();
        engine.resize_extent(width, height);
        assert!(!engine.is_resize_pending());

        engine.resize_extent(800, 400);
        assert!(engine.is_resize_pending());
        assert_eq!(engine.camera().viewport_dimensions(), (800, 400));
    }

    #[test]
    fn extensions_are_deduplicated() {
        let mut engine = engine();
        engine.add_required_extensions([c"VK_KHR_surface", c"VK_KHR_xcb_surface"]);
        engine.add_required_extensions([c"VK_KHR_surface"]);
        assert_eq!(engine.required_extensions().len(), 2);
    }

    #[test]
    fn instance_is_unavailable_before_creation() {
        let engine = engine();
        assert!(matches!(engine.instance(), Err(GpuError::InvalidState(_))));
        assert!(engine.entry().is_err());
    }

    #[test]
    fn drawing_before_init_is_an_error() {
        let mut engine = engine();
        assert!(matches!(engine.draw_frame(), Err(GpuError::InvalidState(_))));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut engine = engine();
        assert!(engine.is_cleaned());
        assert!(!engine.cleanup());
        assert!(!engine.cleanup());
        assert!(engine.is_cleaned());
        assert_eq!(engine.image_count(), 0);
        assert!(engine.swapchain_extent().is_none());
    }

    #[test]
    fn viewport_follows_swapchain_extent() {
        let mut engine = engine();
        engine.resize_extent(1000, 500);
        let swapchain = vk::Extent2D {
            width: 800,
            height: 600,
        };

        let synced = sync_viewport(engine.camera_mut(), Some(swapchain));
        assert_eq!(synced, Some(swapchain));
        assert_eq!(engine.camera().viewport_dimensions(), (800, 600));
        assert!((engine.camera().aspect() - 800.0 / 600.0).abs() < 1e-6);
    }

    #[test]
    fn deferred_rebuild_keeps_window_viewport() {
        let mut engine = engine();
        engine.resize_extent(1000, 500);
        assert_eq!(sync_viewport(engine.camera_mut(), None), None);
        assert_eq!(engine.camera().viewport_dimensions(), (1000, 500));
    }

    #[test]
    fn cleanup_releases_instance_once() {
        let scene = Scene::new(vec![Mesh::quad()], Vec::new()).unwrap();
        let mut engine = Engine::new(EngineConfig::default().with_validation(false), scene);
        if let Err(e) = engine.create_instance() {
            eprintln!("Skipping instance test, Vulkan unavailable: {e}");
            return;
        }
        assert!(!engine.is_cleaned());
        assert!(engine.instance().is_ok());

        assert!(engine.cleanup());
        assert!(engine.is_cleaned());
        assert!(engine.instance().is_err());

        assert!(!engine.cleanup());
        assert!(engine.is_cleaned());
        assert!(engine.entry().is_err());
    }
}
