//! Window and event loop runner for the meshview viewer.
//!
//! Creates the window, hands the engine its surface and required instance
//! extensions, and forwards window sizes and redraws to the engine.
//!
//! # Example
//!
//! ```no_run
//! use meshview_app::{run_viewer, AppConfig};
//! use meshview_core::{Mesh, Scene};
//!
//! fn main() -> anyhow::Result<()> {
//!     let scene = Scene::new(vec![Mesh::cube()], Vec::new())?;
//!     run_viewer(AppConfig::default(), scene)
//! }
//! ```

mod runner;

pub use runner::{init_logging, run_viewer, AppConfig};

// Re-export commonly used types for convenience
pub use meshview_gpu::{Engine, EngineConfig, OverlayRenderer};
