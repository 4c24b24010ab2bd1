//! meshview: interactive viewer for triangle meshes.
//!
//! Loads an OBJ file (or a built-in cube) and renders it with MSAA and a
//! circling point light.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p meshview-viewer -- [OPTIONS] [MODEL.obj]
//! ```
//!
//! ## Options
//!
//! - `--vsync`: Present in FIFO mode
//! - `--validation` / `--no-validation`: Force Vulkan validation layers on or off
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod loader;

use std::path::PathBuf;

use anyhow::bail;
use meshview_app::{init_logging, run_viewer, AppConfig};
use meshview_core::{Mesh, Scene};
use tracing::info;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

/// Parsed command line.
#[derive(Debug, Default, PartialEq, Eq)]
struct ViewerArgs {
    model: Option<PathBuf>,
    vsync: bool,
    validation: Option<bool>,
    help: bool,
}

impl ViewerArgs {
    fn parse<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        for arg in args {
            match arg.as_str() {
                "-h" | "--help" => parsed.help = true,
                "--vsync" => parsed.vsync = true,
                "--validation" => parsed.validation = Some(true),
                "--no-validation" => parsed.validation = Some(false),
                flag if flag.starts_with('-') => bail!("Unknown option '{flag}'"),
                path => {
                    if parsed.model.is_some() {
                        bail!("Only one model path may be given");
                    }
                    parsed.model = Some(PathBuf::from(path));
                }
            }
        }
        Ok(parsed)
    }

    fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::new("meshview")
            .with_size(WIDTH, HEIGHT)
            .with_vsync(self.vsync);
        if let Some(validation) = self.validation {
            config = config.with_validation(validation);
        }
        config
    }
}

fn main() -> anyhow::Result<()> {
    let args = ViewerArgs::parse(std::env::args().skip(1))?;
    if args.help {
        print_help();
        return Ok(());
    }

    init_logging();

    let meshes = match &args.model {
        Some(path) => loader::load_obj(path)?,
        None => {
            info!("No model given, showing a cube");
            vec![Mesh::cube()]
        }
    };
    let scene = Scene::new(meshes, Vec::new())?;

    run_viewer(args.app_config(), scene)
}

fn print_help() {
    eprintln!(
        "meshview: interactive viewer for triangle meshes

USAGE:
    cargo run -p meshview-viewer -- [OPTIONS] [MODEL.obj]

OPTIONS:
    --vsync                 Present in FIFO mode
    --validation            Enable Vulkan validation layers
    --no-validation         Disable Vulkan validation layers
                            Default: enabled in debug builds
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ViewerArgs> {
        ViewerArgs::parse(args.iter().map(ToString::to_string))
    }

    #[test]
    fn no_arguments_shows_cube_with_defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args, ViewerArgs::default());
        let config = args.app_config();
        assert_eq!((config.width, config.height), (WIDTH, HEIGHT));
        assert!(!config.vsync);
    }

    #[test]
    fn flags_and_model_path() {
        let args = parse(&["--vsync", "models/bunny.obj", "--no-validation"]).unwrap();
        assert_eq!(args.model, Some(PathBuf::from("models/bunny.obj")));
        assert!(args.vsync);
        assert!(!args.app_config().validation);
    }

    #[test]
    fn help_flag() {
        assert!(parse(&["-h"]).unwrap().help);
        assert!(parse(&["--help"]).unwrap().help);
    }

    #[test]
    fn unknown_flag_is_an_error() {
        assert!(parse(&["--fullscreen"]).is_err());
    }

    #[test]
    fn second_model_is_an_error() {
        assert!(parse(&["a.obj", "b.obj"]).is_err());
    }
}
