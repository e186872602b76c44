//! Swapchain and the per-frame pipeline.
//!
//! A [`Swapchain`] owns everything sized to the window: presentable images,
//! depth and picker attachments and their framebuffers. It also owns one
//! primary and one picker command buffer plus a [`FrameSync`] per frame slot.
//! `begin_frame` and `end_frame` walk a slot through acquire, record, submit
//! and present; an out-of-date surface recreates the window-sized resources.

use crate::buffer::Buffer;
use crate::command::{begin_command_buffer, end_command_buffer, submit_command_buffers, transition_aspect};
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::frame::{Frame, FrameRing, FrameStatus, SlotState};
use crate::memory::{DedicatedImage, MemoryUsage};
use crate::picker::{decode_bgra, PICKER_CLEAR_COLOR};
use crate::render_pass::PICKER_FORMAT;
use crate::surface::{calculate_extent, PresentationWindow, Surface};
use crate::sync::FrameSync;
use ash::vk;
use jetz_core::constants::FRAMES_IN_FLIGHT;
use jetz_core::{usable_framebuffer, FrameClock, FramebufferSize};
use std::sync::Arc;

/// Swapchain images requested from the presentation engine.
pub const DESIRED_IMAGE_COUNT: u32 = 2;

/// Background color of the primary pass.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Image count to request, within the surface's limits.
pub fn swapchain_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = DESIRED_IMAGE_COUNT.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// What `begin_frame` does with the result of `vkAcquireNextImageKHR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready. A suboptimal image is still rendered to; the
    /// present that follows triggers the recreation.
    Image { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be recreated
    /// before anything is rendered.
    OutOfDate,
}

/// Sort an acquire result into rendering, recreating, or a fatal error.
pub fn classify_acquire(result: ash::prelude::VkResult<(u32, bool)>) -> Result<AcquireOutcome> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(e.into()),
    }
}

/// Whether a present result asks for the swapchain to be recreated.
pub fn present_needs_recreate(result: ash::prelude::VkResult<bool>) -> Result<bool> {
    match result {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// Sharing mode for swapchain images given the distinct queue families.
pub fn image_sharing_mode(unique_families: &[u32]) -> vk::SharingMode {
    if unique_families.len() > 1 {
        vk::SharingMode::CONCURRENT
    } else {
        vk::SharingMode::EXCLUSIVE
    }
}

/// Clear values of the primary pass: color, then depth/stencil.
pub fn primary_clear_values() -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: CLEAR_COLOR,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

fn picker_clear_values() -> [vk::ClearValue; 1] {
    [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: PICKER_CLEAR_COLOR,
        },
    }]
}

unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    let view = device.create_image_view(&view_info, None)?;
    Ok(view)
}

/// A window-sized attachment with its own memory.
struct AttachmentImage {
    image: DedicatedImage,
    view: vk::ImageView,
}

impl AttachmentImage {
    /// Create the image and view, and move it into `layout`.
    unsafe fn new(
        device: &Device,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
        layout: vk::ImageLayout,
    ) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let raw = device.raw();
        let image = DedicatedImage::new(
            raw,
            &device.gpu().memory_properties,
            &create_info,
            MemoryUsage::GpuOnly,
        )?;

        let view = match create_image_view(raw, image.image, format, transition_aspect(format, layout)) {
            Ok(view) => view,
            Err(e) => {
                image.destroy(raw);
                return Err(e);
            }
        };

        let attachment = Self { image, view };
        if let Err(e) = device.transition_image_layout(
            attachment.image.image,
            format,
            vk::ImageLayout::UNDEFINED,
            layout,
        ) {
            attachment.destroy(raw);
            return Err(e);
        }

        Ok(attachment)
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        self.image.destroy(device);
    }
}

/// Everything recreated when the surface changes size.
struct RenderTargets {
    handle: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth: Vec<AttachmentImage>,
    picker: Vec<AttachmentImage>,
    framebuffers: Vec<vk::Framebuffer>,
    picker_framebuffers: Vec<vk::Framebuffer>,
    // Picker images only become readable once a frame has rendered into them
    picker_rendered: Vec<bool>,
}

impl RenderTargets {
    /// Create swapchain, views, depth and picker attachments, and framebuffers,
    /// in that order.
    unsafe fn new(
        device: &Device,
        surface: &Surface,
        size: FramebufferSize,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        let gpu = device.gpu();
        let raw = device.raw();
        let loader = device.swapchain_loader();

        let capabilities = surface.capabilities(gpu.physical_device)?.capabilities;
        let extent = calculate_extent(&capabilities, size.width, size.height);
        let format = gpu.surface_format;
        let families = gpu.queue_families.unique();

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(swapchain_image_count(&capabilities))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(image_sharing_mode(&families))
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(gpu.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        if families.len() > 1 {
            create_info = create_info.queue_family_indices(&families);
        }

        let handle = loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;
        let images = loader.get_swapchain_images(handle)?;

        let mut targets = Self {
            handle,
            format: format.format,
            extent,
            images,
            image_views: Vec::new(),
            depth: Vec::new(),
            picker: Vec::new(),
            framebuffers: Vec::new(),
            picker_framebuffers: Vec::new(),
            picker_rendered: Vec::new(),
        };

        // Everything created so far is released by destroy() on failure
        if let Err(e) = targets.create_attachments(device) {
            targets.destroy(raw, loader);
            return Err(e);
        }

        tracing::info!(
            "Swapchain created: {}x{} ({} images, {:?})",
            extent.width,
            extent.height,
            targets.images.len(),
            gpu.present_mode
        );

        Ok(targets)
    }

    unsafe fn create_attachments(&mut self, device: &Device) -> Result<()> {
        let raw = device.raw();
        let depth_format = device.gpu().depth_format;

        for &image in &self.images {
            let view = create_image_view(raw, image, self.format, vk::ImageAspectFlags::COLOR)?;
            self.image_views.push(view);

            self.depth.push(AttachmentImage::new(
                device,
                depth_format,
                self.extent,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )?);

            self.picker.push(AttachmentImage::new(
                device,
                PICKER_FORMAT,
                self.extent,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            )?);
            self.picker_rendered.push(false);
        }

        for (i, &view) in self.image_views.iter().enumerate() {
            let attachments = [view, self.depth[i].view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(device.render_pass())
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            self.framebuffers
                .push(raw.create_framebuffer(&framebuffer_info, None)?);

            let picker_attachments = [self.picker[i].view];
            let picker_info = vk::FramebufferCreateInfo::default()
                .render_pass(device.picker_render_pass())
                .attachments(&picker_attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            self.picker_framebuffers
                .push(raw.create_framebuffer(&picker_info, None)?);
        }

        Ok(())
    }

    /// Destroy in reverse creation order.
    unsafe fn destroy(&self, device: &ash::Device, loader: &ash::khr::swapchain::Device) {
        for &framebuffer in self.picker_framebuffers.iter().chain(&self.framebuffers) {
            device.destroy_framebuffer(framebuffer, None);
        }
        for attachment in self.picker.iter().chain(&self.depth) {
            attachment.destroy(device);
        }
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        loader.destroy_swapchain(self.handle, None);
    }
}

/// Per-slot objects gathered while a swapchain is built.
#[derive(Default)]
struct SlotResources {
    command_buffers: Vec<vk::CommandBuffer>,
    picker_command_buffers: Vec<vk::CommandBuffer>,
    sync: Vec<FrameSync>,
}

impl SlotResources {
    /// Fill every slot, then create the picker readback buffer. On failure
    /// whatever was created so far stays in `self` for [`Self::destroy`].
    fn build(&mut self, device: &Arc<Device>) -> Result<Buffer> {
        let slots = FRAMES_IN_FLIGHT as u32;
        self.command_buffers = device.allocate_command_buffers(slots)?;
        self.picker_command_buffers = device.allocate_command_buffers(slots)?;
        for _ in 0..FRAMES_IN_FLIGHT {
            self.sync.push(unsafe { FrameSync::new(device.raw())? });
        }
        Buffer::new(
            device,
            4,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryUsage::GpuToCpu,
        )
    }

    /// # Safety
    /// None of the objects may be in use.
    unsafe fn destroy(&self, device: &Device) {
        for sync in &self.sync {
            sync.destroy(device.raw());
        }
        if !self.picker_command_buffers.is_empty() {
            device.free_command_buffers(&self.picker_command_buffers);
        }
        if !self.command_buffers.is_empty() {
            device.free_command_buffers(&self.command_buffers);
        }
    }
}

/// A window's swapchain and the frame slots rendering into it.
pub struct Swapchain {
    device: Arc<Device>,
    window: Arc<dyn PresentationWindow>,
    targets: RenderTargets,
    command_buffers: Vec<vk::CommandBuffer>,
    picker_command_buffers: Vec<vk::CommandBuffer>,
    sync: Vec<FrameSync>,
    ring: FrameRing,
    clock: FrameClock,
    picker_readback: Buffer,
    // Set while the window is too small to recreate for.
    resize_pending: bool,
    // Destroyed after the swapchain built on it.
    surface: Surface,
}

impl Swapchain {
    /// Create the swapchain and per-slot resources for a window.
    ///
    /// Blocks while the window is minimized if the window pumps its own
    /// events; a zero-sized window driven by an outer loop is an error.
    pub fn new(
        device: Arc<Device>,
        surface: Surface,
        window: Arc<dyn PresentationWindow>,
    ) -> Result<Self> {
        let size = usable_framebuffer(window.as_ref()).ok_or_else(|| {
            GpuError::InvalidState("cannot create a swapchain for a zero-sized window".to_string())
        })?;
        let targets = unsafe { RenderTargets::new(&device, &surface, size, vk::SwapchainKHR::null())? };

        let mut slots = SlotResources::default();
        let picker_readback = match slots.build(&device) {
            Ok(buffer) => buffer,
            Err(e) => {
                unsafe {
                    slots.destroy(&device);
                    targets.destroy(device.raw(), device.swapchain_loader());
                }
                return Err(e);
            }
        };

        Ok(Self {
            device,
            window,
            targets,
            command_buffers: slots.command_buffers,
            picker_command_buffers: slots.picker_command_buffers,
            sync: slots.sync,
            ring: FrameRing::new(FRAMES_IN_FLIGHT),
            clock: FrameClock::new(),
            picker_readback,
            resize_pending: false,
            surface,
        })
    }

    /// The device the swapchain renders with.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Current extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.targets.extent
    }

    /// Color format of the presentable images.
    pub fn format(&self) -> vk::Format {
        self.targets.format
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> usize {
        self.targets.images.len()
    }

    /// Number of frame slots.
    pub fn frame_count(&self) -> usize {
        self.ring.len()
    }

    /// Slot the next `begin_frame` will use.
    pub fn next_frame_idx(&self) -> usize {
        self.ring.current()
    }

    /// Lifecycle state of a frame slot.
    pub fn slot_state(&self, frame_idx: usize) -> Result<SlotState> {
        self.ring.state(frame_idx)
    }

    /// Whether a recreation is waiting for the window to get a non-zero size.
    pub fn is_resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Whether a slot's last submission has finished executing.
    pub fn is_slot_idle(&self, frame_idx: usize) -> Result<bool> {
        let sync = self
            .sync
            .get(frame_idx)
            .ok_or_else(|| GpuError::OutOfRange(format!("frame slot {frame_idx}")))?;
        unsafe { sync.is_idle(self.device.raw()) }
    }

    /// Depth attachment views, one per presentable image.
    pub fn depth_views(&self) -> Vec<vk::ImageView> {
        self.targets.depth.iter().map(|d| d.view).collect()
    }

    /// Depth attachment images, one per presentable image.
    pub fn depth_images(&self) -> Vec<vk::Image> {
        self.targets.depth.iter().map(|d| d.image.image).collect()
    }

    /// Start a frame.
    ///
    /// Waits for the slot's previous submission, acquires an image and leaves
    /// both command buffers recording inside their render passes. If the
    /// surface was out of date the swapchain is recreated and the returned
    /// frame is [`FrameStatus::Stale`]; skip rendering and do not end it.
    /// While a recreation is pending on a zero-sized window every frame is
    /// stale and nothing blocks.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn begin_frame(&mut self) -> Result<Frame> {
        let delta_time = self.clock.tick();

        // Recreating resets the ring, so this runs before a slot is picked.
        if self.resize_pending {
            self.resize()?;
            if self.resize_pending {
                let frame_idx = self.ring.current();
                self.ring.advance();
                return Ok(self.stale_frame(frame_idx, delta_time));
            }
        }

        let frame_idx = self.ring.current();
        let state = self.ring.state(frame_idx)?;
        if !state.can_transition_to(SlotState::Acquired) {
            return Err(GpuError::InvalidState(format!(
                "begin_frame on slot {frame_idx} in state {state:?}"
            )));
        }

        let sync = self.sync[frame_idx];
        let raw = self.device.raw();
        unsafe { sync.wait(raw)? };

        let acquired = unsafe {
            self.device.swapchain_loader().acquire_next_image(
                self.targets.handle,
                u64::MAX,
                sync.image_available,
                vk::Fence::null(),
            )
        };

        let image_idx = match classify_acquire(acquired)? {
            AcquireOutcome::Image { index, suboptimal } => {
                if suboptimal {
                    tracing::trace!("Acquired image {index} from a suboptimal swapchain");
                }
                index
            }
            AcquireOutcome::OutOfDate => {
                tracing::debug!("Swapchain out of date on acquire");
                self.resize()?;
                self.ring.advance();
                return Ok(self.stale_frame(frame_idx, delta_time));
            }
        };

        // Only reset once work is guaranteed to be submitted on this fence
        unsafe { sync.reset(raw)? };
        self.ring.transition(frame_idx, SlotState::Acquired)?;

        let extent = self.targets.extent;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        let cmd = self.command_buffers[frame_idx];
        let picker_cmd = self.picker_command_buffers[frame_idx];
        let image = image_idx as usize;

        unsafe {
            let clear_values = primary_clear_values();
            begin_command_buffer(raw, cmd, vk::CommandBufferUsageFlags::SIMULTANEOUS_USE)?;
            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.device.render_pass())
                .framebuffer(self.targets.framebuffers[image])
                .render_area(render_area)
                .clear_values(&clear_values);
            raw.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);

            let picker_clear = picker_clear_values();
            begin_command_buffer(raw, picker_cmd, vk::CommandBufferUsageFlags::SIMULTANEOUS_USE)?;
            let picker_begin = vk::RenderPassBeginInfo::default()
                .render_pass(self.device.picker_render_pass())
                .framebuffer(self.targets.picker_framebuffers[image])
                .render_area(render_area)
                .clear_values(&picker_clear);
            raw.cmd_begin_render_pass(picker_cmd, &picker_begin, vk::SubpassContents::INLINE);
        }
        self.ring.transition(frame_idx, SlotState::Recording)?;
        self.ring.advance();

        Ok(Frame {
            frame_idx,
            image_idx,
            status: FrameStatus::Ready,
            delta_time,
            width: extent.width,
            height: extent.height,
            command_buffer: cmd,
            picker_command_buffer: picker_cmd,
        })
    }

    /// Finish a frame: end recording, submit and present.
    ///
    /// A stale frame is ignored. An out-of-date or suboptimal present
    /// recreates the swapchain.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn end_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.is_stale() {
            return Ok(());
        }

        let frame_idx = frame.frame_idx;
        self.ring.transition(frame_idx, SlotState::Submitted)?;

        let raw = self.device.raw();
        let sync = self.sync[frame_idx];
        let cmd = self.command_buffers[frame_idx];
        let picker_cmd = self.picker_command_buffers[frame_idx];

        unsafe {
            raw.cmd_end_render_pass(cmd);
            end_command_buffer(raw, cmd)?;
            raw.cmd_end_render_pass(picker_cmd);
            end_command_buffer(raw, picker_cmd)?;

            submit_command_buffers(
                raw,
                self.device.graphics_queue(),
                &[cmd, picker_cmd],
                &[sync.image_available],
                &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                &[sync.render_finished],
                sync.in_flight,
            )?;
        }
        if let Some(rendered) = self.targets.picker_rendered.get_mut(frame.image_idx as usize) {
            *rendered = true;
        }

        let swapchains = [self.targets.handle];
        let image_indices = [frame.image_idx];
        let wait_semaphores = [sync.render_finished];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let presented = unsafe {
            self.device
                .swapchain_loader()
                .queue_present(self.device.present_queue(), &present_info)
        };
        self.ring.transition(frame_idx, SlotState::Presented)?;

        if present_needs_recreate(presented)? {
            tracing::debug!("Swapchain out of date or suboptimal on present");
            self.resize()?;
        }
        Ok(())
    }

    /// Recreate the swapchain for the window's current size.
    ///
    /// A window that pumps its own events is waited on while minimized.
    /// Otherwise a zero-sized window leaves the recreation pending until a
    /// later `begin_frame` or `resize_to` finds a usable size.
    pub fn resize(&mut self) -> Result<()> {
        match usable_framebuffer(self.window.as_ref()) {
            Some(size) => self.recreate(size),
            None => {
                if !self.resize_pending {
                    tracing::debug!("Window is zero-sized, deferring swapchain recreation");
                }
                self.resize_pending = true;
                Ok(())
            }
        }
    }

    /// Recreate the swapchain for an explicit size.
    ///
    /// A zero dimension falls back to [`Self::resize`].
    pub fn resize_to(&mut self, width: u32, height: u32) -> Result<()> {
        let size = FramebufferSize::new(width, height);
        if size.is_zero() {
            return self.resize();
        }
        self.recreate(size)
    }

    fn recreate(&mut self, size: FramebufferSize) -> Result<()> {
        if self.ring.is_recording() {
            return Err(GpuError::InvalidState(
                "resize while a frame is being recorded".to_string(),
            ));
        }

        self.device.wait_idle()?;

        let targets = unsafe {
            RenderTargets::new(&self.device, &self.surface, size, self.targets.handle)?
        };
        let old = std::mem::replace(&mut self.targets, targets);
        unsafe { old.destroy(self.device.raw(), self.device.swapchain_loader()) };
        self.ring.reset();
        self.resize_pending = false;

        tracing::debug!(
            "Resized swapchain to {}x{}",
            self.targets.extent.width,
            self.targets.extent.height
        );
        Ok(())
    }

    /// Read the object id drawn at pixel (`x`, `y`) of a finished frame.
    ///
    /// Waits for the device. Returns `None` where nothing was drawn, outside
    /// the extent, or before the frame's picker image was ever rendered.
    pub fn read_picker_id(&self, frame: &Frame, x: u32, y: u32) -> Result<Option<u32>> {
        let extent = self.targets.extent;
        if frame.is_stale() || x >= extent.width || y >= extent.height {
            return Ok(None);
        }

        let image_idx = frame.image_idx as usize;
        let picker = self.targets.picker.get(image_idx).ok_or_else(|| {
            GpuError::OutOfRange(format!("swapchain image {image_idx}"))
        })?;
        if !self.targets.picker_rendered[image_idx] {
            return Ok(None);
        }

        self.device.wait_idle()?;

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D {
                x: x as i32,
                y: y as i32,
                z: 0,
            })
            .image_extent(vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            });

        let image = picker.image.image;
        let readback = self.picker_readback.handle();
        self.device.one_time_commands(|device, cmd| unsafe {
            device.cmd_copy_image_to_buffer(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                readback,
                &[region],
            );

            let to_host = vk::BufferMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(readback)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[to_host],
                &[],
            );
        })?;

        let bytes = self.picker_readback.read(0, 4)?;
        Ok(decode_bgra([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn stale_frame(&self, frame_idx: usize, delta_time: f32) -> Frame {
        let extent = self.targets.extent;
        Frame {
            frame_idx,
            image_idx: 0,
            status: FrameStatus::Stale,
            delta_time,
            width: extent.width,
            height: extent.height,
            command_buffer: vk::CommandBuffer::null(),
            picker_command_buffer: vk::CommandBuffer::null(),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let raw = self.device.raw();
        unsafe {
            let _ = raw.device_wait_idle();

            self.targets.destroy(raw, self.device.swapchain_loader());
            for sync in &self.sync {
                sync.destroy(raw);
            }
            self.device.free_command_buffers(&self.picker_command_buffers);
            self.device.free_command_buffers(&self.command_buffers);
        }
    }
}
