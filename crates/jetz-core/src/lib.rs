//! Core types and traits for the Jetz engine.
//!
//! This crate provides the backend-agnostic pieces shared by the GPU,
//! platform and application crates:
//! - Frame timing
//! - Framebuffer size queries and the minimized-window wait
//! - Engine-wide constants

pub mod clock;
pub mod window;

pub use clock::FrameClock;
pub use window::{usable_framebuffer, wait_for_framebuffer, FramebufferSize, FramebufferSource};

/// Engine-wide constants
pub mod constants {
    /// Number of frame slots the CPU may record ahead of the GPU.
    pub const FRAMES_IN_FLIGHT: usize = 2;
    /// Engine name reported to the graphics driver.
    pub const ENGINE_NAME: &str = "Jetz";
}
