//! Platform layer for the Jetz engine.
//!
//! Wraps a winit window so the GPU backend can create a surface for it, query
//! its framebuffer size and wait while it is minimized.

use ash::vk;
use jetz_core::{FramebufferSize, FramebufferSource};
use jetz_gpu::surface::{create_surface_for, required_extensions_for};
use jetz_gpu::PresentationWindow;
use std::ffi::c_char;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use winit::dpi::LogicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

/// How long `pump_events` yields while waiting for a minimized window.
const PUMP_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Window creation failed: {0}")]
    WindowCreation(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Platform configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            title: "Jetz".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

impl PlatformConfig {
    pub fn new(title: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            title: title.into(),
            width,
            height,
            ..Default::default()
        }
    }

    pub fn with_resizable(mut self, resizable: bool) -> Self {
        self.resizable = resizable;
        self
    }
}

/// A winit window the renderer can present to.
#[derive(Debug, Clone)]
pub struct PlatformWindow {
    window: Arc<Window>,
}

impl PlatformWindow {
    /// Wrap an existing window.
    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }

    /// Create a window on a running event loop.
    pub fn create(event_loop: &ActiveEventLoop, config: &PlatformConfig) -> Result<Self> {
        let attributes = Window::default_attributes()
            .with_title(config.title.as_str())
            .with_inner_size(LogicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);

        let window = event_loop
            .create_window(attributes)
            .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;

        tracing::debug!("Created window \"{}\"", config.title);
        Ok(Self::new(Arc::new(window)))
    }

    /// The underlying winit window.
    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl FramebufferSource for PlatformWindow {
    fn framebuffer_size(&self) -> FramebufferSize {
        let size = self.window.inner_size();
        FramebufferSize::new(size.width, size.height)
    }

    // winit delivers events through the outer loop, so this only yields.
    fn pump_events(&self) {
        std::thread::sleep(PUMP_INTERVAL);
    }

    fn pumps_events(&self) -> bool {
        false
    }
}

impl PresentationWindow for PlatformWindow {
    fn required_extensions(&self) -> jetz_gpu::Result<Vec<*const c_char>> {
        required_extensions_for(self.window.as_ref())
    }

    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> jetz_gpu::Result<vk::SurfaceKHR> {
        create_surface_for(entry, instance, self.window.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = PlatformConfig::new("viewer", 800, 600).with_resizable(false);
        assert_eq!(config.title, "viewer");
        assert_eq!((config.width, config.height), (800, 600));
        assert!(!config.resizable);

        assert!(PlatformConfig::default().resizable);
    }
}
