//! Vulkan backend for the Jetz engine.
//!
//! This crate provides:
//! - Instance creation, GPU discovery and logical device bring-up
//! - A pooled device memory sub-allocator (no external allocator)
//! - Buffers with direct and staged updates
//! - Descriptor layouts and per-view / material sets
//! - The swapchain frame pipeline with resize recovery and object picking
//! - The [`RenderBackend`] trait and its Vulkan implementation

pub mod backend;
pub mod buffer;
pub mod command;
pub mod config;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod instance;
pub mod memory;
pub mod picker;
pub mod render_pass;
pub mod sets;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use backend::{BufferKind, RenderBackend, VulkanBackend};
pub use buffer::{Buffer, BufferArray};
pub use config::GpuConfig;
pub use descriptors::{DescriptorPool, DescriptorSetLayoutBuilder};
pub use device::Device;
pub use error::{GpuError, Result};
pub use frame::{Frame, FrameStatus, SlotState};
pub use gpu::{Gpu, GpuVendor, QueueFamilies};
pub use instance::Instance;
pub use memory::{MemoryAllocator, MemoryUsage, SubAllocation};
pub use picker::{picker_color, NO_OBJECT};
pub use sets::{MaterialSet, MaterialUbo, PerViewSet, PerViewUbo};
pub use shader::{load_spirv, ShaderModule};
pub use surface::{PresentationWindow, Surface};
pub use swapchain::{AcquireOutcome, Swapchain};
pub use sync::FrameSync;
