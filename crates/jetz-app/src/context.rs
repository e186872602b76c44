//! Application context.

use ash::vk;
use jetz_gpu::{Device, Swapchain, VulkanBackend};
use jetz_platform::PlatformWindow;
use std::sync::Arc;

/// Application context shared across all app methods.
pub struct AppContext {
    /// The rendering backend.
    pub backend: VulkanBackend,
    /// The window being rendered to.
    pub window: PlatformWindow,
    /// Total frames rendered.
    pub frame_count: u64,
}

impl AppContext {
    pub(crate) const fn new(backend: VulkanBackend, window: PlatformWindow) -> Self {
        Self {
            backend,
            window,
            frame_count: 0,
        }
    }

    /// The logical device.
    pub fn device(&self) -> &Arc<Device> {
        self.backend.device()
    }

    /// The window swapchain.
    pub fn swapchain(&self) -> &Swapchain {
        self.backend.swapchain()
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain().extent()
    }

    /// Get the swapchain width.
    pub fn width(&self) -> u32 {
        self.extent().width
    }

    /// Get the swapchain height.
    pub fn height(&self) -> u32 {
        self.extent().height
    }

    /// Get the number of frames in flight.
    pub fn frames_in_flight(&self) -> usize {
        self.swapchain().frame_count()
    }
}
