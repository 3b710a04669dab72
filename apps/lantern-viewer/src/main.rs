//! Lantern Demo Viewer
//!
//! Composes an animated frame offscreen each frame and blits it to the
//! window through the presentable-image pipeline: clear the render target,
//! stamp an overlay into its corner, then scale the result onto the
//! acquired swapchain image.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p lantern-viewer -- [IMAGE]
//! ```
//!
//! ## Options
//!
//! - `[IMAGE]`: Path to an overlay image stamped into the frame corner.
//!   Any format the `image` crate decodes. Defaults to a generated
//!   checkerboard.
//! - `-h, --help`: Print help message
//!
//! ## Examples
//!
//! ```bash
//! # Built-in checkerboard overlay
//! cargo run -p lantern-viewer
//!
//! # Custom overlay image
//! cargo run -p lantern-viewer -- logo.png
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod canvas;

use lantern_app::{run_app, AppConfig};

use crate::app::Viewer;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const TARGET_FPS: u32 = 240;

fn main() -> anyhow::Result<()> {
    // Check for help flag before starting the app
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    run_app::<Viewer>(
        AppConfig::new("Lantern Viewer")
            .with_size(WIDTH, HEIGHT)
            .with_target_fps(TARGET_FPS),
    )
}

fn print_help() {
    eprintln!(
        "Lantern Demo Viewer

USAGE:
    cargo run -p lantern-viewer -- [IMAGE]

ARGS:
    [IMAGE]     Path to an overlay image stamped into the frame corner.
                Any format the image crate decodes (PNG, JPEG, BMP, ...).
                Default: a generated checkerboard.

OTHER:
    -h, --help  Print this help message

CONTROLS:
    Escape      Exit the viewer

EXAMPLES:
    # Built-in checkerboard overlay
    cargo run -p lantern-viewer

    # Custom overlay image
    cargo run -p lantern-viewer -- logo.png

ENVIRONMENT VARIABLES:
    RUST_LOG    Set log level (e.g., info, debug, trace)"
    );
}
