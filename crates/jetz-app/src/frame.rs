//! Per-frame context for rendering.

use ash::vk;
use jetz_gpu::Frame;

/// Context for the frame being recorded.
pub struct FrameContext {
    /// The frame returned by `begin_frame`.
    pub frame: Frame,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Frames rendered before this one.
    pub frame_number: u64,
}

impl FrameContext {
    pub(crate) const fn new(frame: Frame, frame_number: u64) -> Self {
        Self {
            dt: frame.delta_time,
            frame,
            frame_number,
        }
    }

    /// Primary command buffer, inside the primary render pass.
    pub const fn command_buffer(&self) -> vk::CommandBuffer {
        self.frame.command_buffer
    }

    /// Picker command buffer, inside the picker render pass.
    pub const fn picker_command_buffer(&self) -> vk::CommandBuffer {
        self.frame.picker_command_buffer
    }

    /// Frame slot for per-slot resources such as uniform sets.
    pub const fn frame_idx(&self) -> usize {
        self.frame.frame_idx
    }

    /// Swapchain image for image-specific resources.
    pub const fn image_idx(&self) -> u32 {
        self.frame.image_idx
    }

    pub const fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.frame.width,
            height: self.frame.height,
        }
    }
}
