//! Logical device bring-up and the long-lived objects it owns.

use crate::command::{cmd_transition_image_layout, execute_single_time_commands, layout_transition, CommandPool};
use crate::descriptors::{
    material_layout, material_pool_capacity, per_view_layout, per_view_pool_capacity,
    DescriptorAllocator,
};
use crate::error::Result;
use crate::gpu::{Gpu, QueueFamilies};
use crate::instance::Instance;
use crate::memory::{MemoryAllocator, MemoryUsage, SubAllocation};
use crate::render_pass::{create_picker_render_pass, create_primary_render_pass};
use ash::vk;
use parking_lot::Mutex;
use std::ffi::c_char;
use std::sync::Arc;

/// Upper bound on sampler anisotropy.
pub const MAX_ANISOTROPY: f32 = 16.0;

/// Sampler parameters for material textures.
///
/// Anisotropy is enabled when the device supports it, clamped to the device limit.
pub fn sampler_create_info(gpu: &Gpu) -> vk::SamplerCreateInfo<'static> {
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);

    if gpu.supports_sampler_anisotropy() {
        info.anisotropy_enable(true)
            .max_anisotropy(MAX_ANISOTROPY.min(gpu.properties.limits.max_sampler_anisotropy))
    } else {
        info.anisotropy_enable(false).max_anisotropy(1.0)
    }
}

/// The logical device.
///
/// Owns the command pool, memory allocator, sampler, descriptor layouts and
/// both render passes. Shared through `Arc` by every buffer and swapchain built
/// from it, so it outlives all of them. Teardown runs in reverse creation order.
pub struct Device {
    raw: ash::Device,
    gpu: Gpu,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: Mutex<CommandPool>,
    allocator: Mutex<MemoryAllocator>,
    sampler: vk::Sampler,
    per_view: DescriptorAllocator,
    material: DescriptorAllocator,
    render_pass: vk::RenderPass,
    picker_render_pass: vk::RenderPass,
    swapchain_loader: ash::khr::swapchain::Device,
    // Dropped after the device is destroyed.
    instance: Arc<Instance>,
}

impl Device {
    /// Create the logical device and everything it owns.
    pub fn new(instance: Arc<Instance>, gpu: Gpu) -> Result<Arc<Self>> {
        let presenting = !gpu.surface_formats.is_empty();
        let raw = unsafe { create_logical_device(instance.raw(), &gpu, presenting)? };

        let objects = match unsafe { DeviceObjects::new(&raw, &gpu) } {
            Ok(objects) => objects,
            Err(e) => {
                unsafe { raw.destroy_device(None) };
                return Err(e);
            }
        };

        let graphics_queue = unsafe { raw.get_device_queue(gpu.queue_families.graphics, 0) };
        let present_queue = unsafe { raw.get_device_queue(gpu.queue_families.present, 0) };

        let allocator = MemoryAllocator::new(
            gpu.memory_properties,
            gpu.properties.limits.buffer_image_granularity,
        );
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.raw(), &raw);

        tracing::debug!(
            "Logical device ready (graphics family {}, present family {})",
            gpu.queue_families.graphics,
            gpu.queue_families.present
        );

        Ok(Arc::new(Self {
            raw,
            gpu,
            graphics_queue,
            present_queue,
            command_pool: Mutex::new(objects.command_pool),
            allocator: Mutex::new(allocator),
            sampler: objects.sampler,
            per_view: objects.per_view,
            material: objects.material,
            render_pass: objects.render_pass,
            picker_render_pass: objects.picker_render_pass,
            swapchain_loader,
            instance,
        }))
    }

    /// Get the Vulkan device handle.
    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    /// The physical device this device was created on.
    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    /// The instance this device was created from.
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Queue family indices in use.
    pub fn queue_families(&self) -> QueueFamilies {
        self.gpu.queue_families
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// The reset-capable command pool on the graphics family.
    pub fn command_pool(&self) -> &Mutex<CommandPool> {
        &self.command_pool
    }

    /// Get access to the memory allocator.
    pub fn allocator(&self) -> &Mutex<MemoryAllocator> {
        &self.allocator
    }

    /// Texture sampler shared by all materials.
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Per-view set layout and pool.
    pub fn per_view_descriptors(&self) -> &DescriptorAllocator {
        &self.per_view
    }

    /// Material set layout and pool.
    pub fn material_descriptors(&self) -> &DescriptorAllocator {
        &self.material
    }

    /// Primary color + depth render pass.
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Color-only render pass for object ids.
    pub fn picker_render_pass(&self) -> vk::RenderPass {
        self.picker_render_pass
    }

    /// Swapchain extension loader.
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Create a buffer bound to pool memory.
    pub fn alloc_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
    ) -> Result<(vk::Buffer, SubAllocation)> {
        self.allocator
            .lock()
            .alloc_buffer(&self.raw, size, usage, memory_usage)
    }

    /// Create an image bound to pool memory.
    pub fn alloc_image(
        &self,
        create_info: &vk::ImageCreateInfo,
        memory_usage: MemoryUsage,
    ) -> Result<(vk::Image, SubAllocation)> {
        self.allocator
            .lock()
            .alloc_image(&self.raw, create_info, memory_usage)
    }

    /// Allocate primary command buffers from the device's pool.
    pub fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        unsafe { self.command_pool.lock().allocate(&self.raw, count) }
    }

    /// Return command buffers to the device's pool.
    ///
    /// # Safety
    /// The buffers must come from this device and must not be pending.
    pub unsafe fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        self.command_pool.lock().free(&self.raw, buffers);
    }

    /// Record and submit a one-time command buffer on the graphics queue,
    /// blocking until it has executed.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn one_time_commands<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let pool = self.command_pool.lock();
        unsafe {
            execute_single_time_commands(&self.raw, &pool, self.graphics_queue, |cmd| {
                f(&self.raw, cmd);
            })
        }
    }

    /// Transition a single-mip image between layouts and wait for it.
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        format: vk::Format,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) -> Result<()> {
        layout_transition(from, to)?;

        let mut recorded = Ok(());
        self.one_time_commands(|device, cmd| {
            recorded = unsafe { cmd_transition_image_layout(device, cmd, image, format, from, to) };
        })?;
        recorded
    }

    /// Wait for device to be idle.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.raw.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.raw.device_wait_idle();

            self.raw.destroy_render_pass(self.picker_render_pass, None);
            self.raw.destroy_render_pass(self.render_pass, None);
            self.material.destroy(&self.raw);
            self.per_view.destroy(&self.raw);
            self.raw.destroy_sampler(self.sampler, None);

            // Frees every VkDeviceMemory block before the device goes away
            self.allocator.lock().release_all(&self.raw);
            self.command_pool.lock().destroy(&self.raw);

            self.raw.destroy_device(None);
        }
    }
}

/// Objects created right after the logical device, in creation order.
struct DeviceObjects {
    command_pool: CommandPool,
    sampler: vk::Sampler,
    per_view: DescriptorAllocator,
    material: DescriptorAllocator,
    render_pass: vk::RenderPass,
    picker_render_pass: vk::RenderPass,
}

impl DeviceObjects {
    /// Objects already created are destroyed again if a later step fails.
    unsafe fn new(device: &ash::Device, gpu: &Gpu) -> Result<Self> {
        let command_pool = CommandPool::new(
            device,
            gpu.queue_families.graphics,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let sampler = device
            .create_sampler(&sampler_create_info(gpu), None)
            .inspect_err(|_| command_pool.destroy(device))?;
        let per_view = DescriptorAllocator::new(device, per_view_layout(), per_view_pool_capacity())
            .inspect_err(|_| {
                device.destroy_sampler(sampler, None);
                command_pool.destroy(device);
            })?;
        let material = DescriptorAllocator::new(device, material_layout(), material_pool_capacity())
            .inspect_err(|_| {
                per_view.destroy(device);
                device.destroy_sampler(sampler, None);
                command_pool.destroy(device);
            })?;
        let render_pass =
            create_primary_render_pass(device, gpu.surface_format.format, gpu.depth_format)
                .inspect_err(|_| {
                    material.destroy(device);
                    per_view.destroy(device);
                    device.destroy_sampler(sampler, None);
                    command_pool.destroy(device);
                })?;
        let picker_render_pass = create_picker_render_pass(device).inspect_err(|_| {
            device.destroy_render_pass(render_pass, None);
            material.destroy(device);
            per_view.destroy(device);
            device.destroy_sampler(sampler, None);
            command_pool.destroy(device);
        })?;

        Ok(Self {
            command_pool,
            sampler,
            per_view,
            material,
            render_pass,
            picker_render_pass,
        })
    }
}

/// Create the logical device with one queue per used family.
///
/// # Safety
/// The physical device in `gpu` must belong to the instance.
unsafe fn create_logical_device(
    instance: &ash::Instance,
    gpu: &Gpu,
    presenting: bool,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = gpu
        .queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let mut extension_names: Vec<*const c_char> = Vec::new();
    if presenting {
        extension_names.push(ash::khr::swapchain::NAME.as_ptr());
    }

    let features =
        vk::PhysicalDeviceFeatures::default().sampler_anisotropy(gpu.supports_sampler_anisotropy());

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = instance.create_device(gpu.physical_device, &device_create_info, None)?;
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuVendor;
    use approx::assert_relative_eq;

    fn test_gpu(anisotropy: bool, max_anisotropy: f32) -> Gpu {
        let mut properties = vk::PhysicalDeviceProperties::default();
        properties.limits.max_sampler_anisotropy = max_anisotropy;
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(anisotropy);

        Gpu {
            physical_device: vk::PhysicalDevice::null(),
            vendor: GpuVendor::Other(0),
            device_name: "test".to_string(),
            properties,
            features,
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            queue_families: QueueFamilies {
                graphics: 0,
                present: 0,
            },
            surface_formats: Vec::new(),
            present_modes: Vec::new(),
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            depth_format: vk::Format::D32_SFLOAT,
        }
    }

    #[test]
    fn sampler_clamps_anisotropy_to_device_limit() {
        let info = sampler_create_info(&test_gpu(true, 8.0));
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_relative_eq!(info.max_anisotropy, 8.0);

        let info = sampler_create_info(&test_gpu(true, 64.0));
        assert_relative_eq!(info.max_anisotropy, MAX_ANISOTROPY);
    }

    #[test]
    fn sampler_without_anisotropy_support() {
        let info = sampler_create_info(&test_gpu(false, 16.0));
        assert_eq!(info.anisotropy_enable, vk::FALSE);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.min_filter, vk::Filter::LINEAR);
    }
}
