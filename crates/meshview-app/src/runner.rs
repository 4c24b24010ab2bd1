//! Application runner and event loop.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use meshview_core::Scene;
use meshview_gpu::surface::{create_surface, required_extensions};
use meshview_gpu::{Engine, EngineConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "meshview".to_string(),
            width: 1280,
            height: 720,
            vsync: false,
            validation: cfg!(debug_assertions),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_validation(self.validation)
            .with_vsync(self.vsync)
    }
}

/// Install the `tracing` subscriber, honoring `RUST_LOG` (default `info`).
pub fn init_logging() {
    // A second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// Open a window and render `scene` until it is closed.
///
/// Initializes logging. Any engine error ends the loop and is returned.
pub fn run_viewer(config: AppConfig, scene: Scene) -> anyhow::Result<()> {
    init_logging();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = ViewerRunner {
        config,
        scene: Some(scene),
        state: None,
        error: None,
    };

    event_loop
        .run_app(&mut runner)
        .context("Event loop error")?;

    match runner.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal runner that implements winit's `ApplicationHandler`.
struct ViewerRunner {
    config: AppConfig,
    scene: Option<Scene>,
    state: Option<ViewerState>,
    error: Option<anyhow::Error>,
}

/// Live window and engine.
///
/// The engine owns the surface, so it is dropped before the window.
struct ViewerState {
    engine: Engine,
    window: Arc<Window>,
    started: Instant,
    frame_count: u64,
}

impl ApplicationHandler for ViewerRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let Some(scene) = self.scene.take() else {
            return;
        };

        info!("Creating viewer state...");

        match create_state(&self.config, scene, event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Viewer ready!");
            }
            Err(e) => {
                error!("Failed to initialize viewer: {e:#}");
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.engine.resize_extent(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                if let Err(e) = state.render_frame() {
                    error!("Render error: {e:#}");
                    if let Some(mut state) = self.state.take() {
                        state.cleanup();
                    }
                    self.error = Some(e);
                    event_loop.exit();
                    return;
                }
                state.window.request_redraw();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

fn create_state(
    config: &AppConfig,
    scene: Scene,
    event_loop: &ActiveEventLoop,
) -> anyhow::Result<ViewerState> {
    let window_attrs = Window::default_attributes()
        .with_title(&config.title)
        .with_inner_size(PhysicalSize::new(config.width, config.height));
    let window = Arc::new(event_loop.create_window(window_attrs)?);

    let mut engine = Engine::new(config.engine_config(), scene);
    let size = window.inner_size();
    engine.resize_extent(size.width, size.height);

    let extensions = required_extensions(window.as_ref())?;
    engine.add_required_extensions(extensions);
    engine
        .create_instance()
        .context("Failed to create Vulkan instance")?;

    // SAFETY: the instance was created with the window's required extensions
    let surface = unsafe { create_surface(engine.entry()?, engine.instance()?, window.as_ref())? };
    engine.set_surface(surface)?;
    engine.init_vulkan().context("Failed to initialize Vulkan")?;

    Ok(ViewerState {
        engine,
        window,
        started: Instant::now(),
        frame_count: 0,
    })
}

impl ViewerState {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let size = self.window.inner_size();
        self.engine.resize_extent(size.width, size.height);
        self.engine.draw_frame()?;
        self.frame_count += 1;
        Ok(())
    }

    fn cleanup(&mut self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        if self.frame_count > 0 && elapsed > 0.0 {
            info!(
                "Rendered {} frames in {:.1}s ({:.1} FPS avg)",
                self.frame_count,
                elapsed,
                self.frame_count as f64 / elapsed
            );
        }

        info!("Starting cleanup...");
        if self.engine.cleanup() {
            info!("Cleanup complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builders() {
        let config = AppConfig::new("test")
            .with_size(640, 480)
            .with_vsync(true)
            .with_validation(false);
        assert_eq!(config.title, "test");
        assert_eq!((config.width, config.height), (640, 480));

        let engine = config.engine_config();
        assert!(engine.vsync);
        assert!(!engine.validation);
        assert!(engine.ui_overlay);
    }

    #[test]
    fn default_window_matches_camera_viewport() {
        let config = AppConfig::default();
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.validation, cfg!(debug_assertions));
    }
}
