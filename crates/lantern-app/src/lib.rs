//! Application framework for the Lantern renderer.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Window creation and management
//! - GPU context initialization
//! - Swapchain creation and recreation
//! - Frame synchronization and presentable-image transitions
//! - Event loop handling
//!
//! # Example
//!
//! ```no_run
//! use lantern_app::{LanternApp, AppContext, FrameContext, AppConfig, run_app};
//!
//! struct Blank;
//!
//! impl LanternApp for Blank {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(Blank)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn render(&mut self, _ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
//!         // frame.swapchain_image is in the transfer-destination state;
//!         // blit or clear into it here.
//!         let _ = frame.swapchain_image;
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<Blank>(AppConfig::new("Blank"))
//! }
//! ```

mod app;
mod context;
mod frame;
mod runner;

pub use app::LanternApp;
pub use context::AppContext;
pub use frame::FrameContext;
pub use runner::{run_app, AppConfig};

// Re-export commonly used types for convenience
pub use lantern_gpu::{GpuContext, GpuContextBuilder};
pub use winit::event::WindowEvent;
