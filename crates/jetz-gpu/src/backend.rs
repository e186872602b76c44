//! Backend-neutral rendering interface and its Vulkan implementation.

use crate::buffer::Buffer;
use crate::config::GpuConfig;
use crate::device::Device;
use crate::error::Result;
use crate::frame::Frame;
use crate::gpu::Gpu;
use crate::instance::Instance;
use crate::memory::MemoryUsage;
use crate::surface::{PresentationWindow, Surface};
use crate::swapchain::Swapchain;
use ash::vk;
use std::sync::Arc;

/// What a buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

impl BufferKind {
    /// Vulkan usage flags for the kind.
    pub fn usage_flags(self) -> vk::BufferUsageFlags {
        match self {
            Self::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        }
    }
}

/// Operations every rendering backend provides.
///
/// A backend is chosen once at startup; frontends are written against this
/// trait and the backend's associated types.
pub trait RenderBackend {
    /// Per-frame descriptor returned by [`Self::begin_frame`].
    type Frame;
    /// GPU buffer handle.
    type Buffer;

    /// Start a frame. Frames that must be skipped are reported, not errors.
    fn begin_frame(&mut self) -> Result<Self::Frame>;

    /// Submit and present a frame started by [`Self::begin_frame`].
    fn end_frame(&mut self, frame: &Self::Frame) -> Result<()>;

    /// Recreate size-dependent resources.
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    /// Block until all submitted work has finished.
    fn wait_idle(&self) -> Result<()>;

    /// Create a buffer of `size` bytes.
    fn create_buffer(
        &self,
        size: u64,
        kind: BufferKind,
        memory_usage: MemoryUsage,
    ) -> Result<Self::Buffer>;

    /// Write `data` into a buffer at `offset`.
    fn update_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;

    /// Release a buffer.
    fn destroy_buffer(&self, buffer: Self::Buffer);
}

/// The Vulkan backend: instance, device and one window swapchain.
pub struct VulkanBackend {
    // Dropped before the device it was built from
    swapchain: Swapchain,
    device: Arc<Device>,
}

impl VulkanBackend {
    /// Bring up Vulkan for a window.
    pub fn new(window: Arc<dyn PresentationWindow>, config: &GpuConfig) -> Result<Self> {
        let extensions = window.required_extensions()?;
        let instance = Arc::new(Instance::new(config, &extensions)?);
        let surface = Surface::new(Arc::clone(&instance), window.as_ref())?;
        let gpu = Gpu::select(&instance, Some(&surface), config.vsync)?;
        let device = Device::new(instance, gpu)?;
        let swapchain = Swapchain::new(Arc::clone(&device), surface, window)?;

        tracing::info!(
            "Vulkan backend ready (validation {})",
            if device.instance().validation_enabled() {
                "on"
            } else {
                "off"
            }
        );

        Ok(Self { swapchain, device })
    }

    /// The logical device.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// The window swapchain.
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Mutable access to the window swapchain.
    pub fn swapchain_mut(&mut self) -> &mut Swapchain {
        &mut self.swapchain
    }

    /// Object id under a pixel of a finished frame.
    pub fn read_picker_id(&self, frame: &Frame, x: u32, y: u32) -> Result<Option<u32>> {
        self.swapchain.read_picker_id(frame, x, y)
    }
}

impl RenderBackend for VulkanBackend {
    type Frame = Frame;
    type Buffer = Buffer;

    fn begin_frame(&mut self) -> Result<Frame> {
        self.swapchain.begin_frame()
    }

    fn end_frame(&mut self, frame: &Frame) -> Result<()> {
        self.swapchain.end_frame(frame)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.swapchain.resize_to(width, height)
    }

    fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    fn create_buffer(
        &self,
        size: u64,
        kind: BufferKind,
        memory_usage: MemoryUsage,
    ) -> Result<Buffer> {
        Buffer::new(&self.device, size, kind.usage_flags(), memory_usage)
    }

    fn update_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<()> {
        buffer.update(offset, data)
    }

    fn destroy_buffer(&self, buffer: Buffer) {
        drop(buffer);
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::warn!("wait_idle failed during backend shutdown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_kinds_map_to_usage_flags() {
        assert_eq!(
            BufferKind::Vertex.usage_flags(),
            vk::BufferUsageFlags::VERTEX_BUFFER
        );
        assert_eq!(
            BufferKind::Index.usage_flags(),
            vk::BufferUsageFlags::INDEX_BUFFER
        );
        assert_eq!(
            BufferKind::Uniform.usage_flags(),
            vk::BufferUsageFlags::UNIFORM_BUFFER
        );
    }
}
