//! Application framework for the Jetz engine.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Logging setup
//! - Window creation and Vulkan bring-up
//! - Driving `begin_frame` / `end_frame` and skipping stale frames
//! - Resize routing and minimized windows
//! - Orderly teardown
//!
//! # Example
//!
//! ```no_run
//! use jetz_app::{run_app, AppConfig, AppContext, FrameContext, JetzApp};
//!
//! struct MyApp;
//!
//! impl JetzApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn render(&mut self, _ctx: &AppContext, _frame: &mut FrameContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod context;
mod frame;
mod runner;

pub use app::JetzApp;
pub use context::AppContext;
pub use frame::FrameContext;
pub use runner::{run_app, AppConfig};

// Re-export commonly used types for convenience
pub use jetz_gpu::{Frame, RenderBackend, VulkanBackend};
pub use winit::event::WindowEvent;
