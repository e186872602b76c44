//! Jetz Engine Demo Viewer
//!
//! Opens a window, clears it every frame, keeps an orbiting camera's
//! uniforms up to date and reports the object id under the cursor on click.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p jetz-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--vsync`: Prefer FIFO presentation
//! - `--validation`: Enable Vulkan validation layers
//! - `--fps <N>`: Cap the frame rate
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use jetz_app::{run_app, AppConfig};

use crate::app::Viewer;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Check for help flag before starting the app
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    run_app::<Viewer>(parse_config(&args)?)
}

fn parse_config(args: &[String]) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::new("Jetz Engine - Viewer").with_size(WIDTH, HEIGHT);

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--vsync" => config = config.with_vsync(true),
            "--validation" => config = config.with_validation(true),
            "--fps" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--fps needs a value"))?;
                config = config.with_target_fps(value.parse()?);
            }
            other => anyhow::bail!("unknown argument `{other}` (see --help)"),
        }
    }

    Ok(config)
}

fn print_help() {
    eprintln!(
        "Jetz Engine Demo Viewer

USAGE:
    cargo run -p jetz-viewer -- [OPTIONS]

OPTIONS:
    --vsync          Prefer FIFO presentation
    --validation     Enable Vulkan validation layers
    --fps <N>        Cap the frame rate
    -h, --help       Print this help message

CONTROLS:
    Left click       Log the object id under the cursor
    Close window     Exit"
    );
}
