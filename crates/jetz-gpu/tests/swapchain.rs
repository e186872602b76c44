//! Frame pipeline tests against a real device, presenting to a headless surface.
//!
//! Needs a driver exposing `VK_EXT_headless_surface` (Mesa's lavapipe does).
//! Run with `cargo test -p jetz-gpu -- --ignored`.

use ash::vk;
use jetz_core::{FramebufferSize, FramebufferSource};
use jetz_gpu::{
    FrameStatus, GpuConfig, PresentationWindow, RenderBackend, SlotState, Swapchain, VulkanBackend,
};
use parking_lot::Mutex;
use std::ffi::c_char;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A window without a display. Its size is set by the test; a pending
/// restore is applied after a number of event pumps.
struct HeadlessWindow {
    size: Mutex<FramebufferSize>,
    restore: Mutex<Option<(usize, FramebufferSize)>>,
    pumps: AtomicUsize,
    pumps_events: bool,
}

impl HeadlessWindow {
    fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            size: Mutex::new(FramebufferSize::new(width, height)),
            restore: Mutex::new(None),
            pumps: AtomicUsize::new(0),
            pumps_events: true,
        })
    }

    /// Like a winit window: events arrive through an outer loop.
    fn driven_externally(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            size: Mutex::new(FramebufferSize::new(width, height)),
            restore: Mutex::new(None),
            pumps: AtomicUsize::new(0),
            pumps_events: false,
        })
    }

    fn set_size(&self, width: u32, height: u32) {
        *self.size.lock() = FramebufferSize::new(width, height);
    }

    fn restore_after(&self, pumps: usize, width: u32, height: u32) {
        *self.restore.lock() = Some((pumps, FramebufferSize::new(width, height)));
    }

    fn pumps(&self) -> usize {
        self.pumps.load(Ordering::SeqCst)
    }
}

impl FramebufferSource for HeadlessWindow {
    fn framebuffer_size(&self) -> FramebufferSize {
        *self.size.lock()
    }

    fn pump_events(&self) {
        let pumped = self.pumps.fetch_add(1, Ordering::SeqCst) + 1;
        let mut restore = self.restore.lock();
        if let Some((after, size)) = *restore {
            if pumped >= after {
                *self.size.lock() = size;
                *restore = None;
            }
        }
    }

    fn pumps_events(&self) -> bool {
        self.pumps_events
    }
}

impl PresentationWindow for HeadlessWindow {
    fn required_extensions(&self) -> jetz_gpu::Result<Vec<*const c_char>> {
        Ok(vec![
            ash::khr::surface::NAME.as_ptr(),
            ash::ext::headless_surface::NAME.as_ptr(),
        ])
    }

    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> jetz_gpu::Result<vk::SurfaceKHR> {
        let loader = ash::ext::headless_surface::Instance::new(entry, instance);
        let create_info = vk::HeadlessSurfaceCreateInfoEXT::default();
        Ok(loader.create_headless_surface(&create_info, None)?)
    }
}

fn headless_backend(window: &Arc<HeadlessWindow>) -> VulkanBackend {
    let config = GpuConfig::new("jetz-swapchain-tests").with_validation(false);
    let window: Arc<dyn PresentationWindow> = window.clone();
    VulkanBackend::new(window, &config).expect("backend")
}

fn render_empty_frame(swapchain: &mut Swapchain) -> usize {
    let frame = swapchain.begin_frame().unwrap();
    assert_eq!(frame.status, FrameStatus::Ready);
    swapchain.end_frame(&frame).unwrap();
    frame.frame_idx
}

#[test]
#[ignore = "requires a Vulkan device"]
fn frames_alternate_between_slots() {
    let window = HeadlessWindow::new(800, 600);
    let mut backend = headless_backend(&window);

    let mut slots = Vec::new();
    for _ in 0..5 {
        let frame = backend.begin_frame().unwrap();
        assert_eq!(frame.status, FrameStatus::Ready);
        assert_eq!((frame.width, frame.height), (800, 600));
        assert_ne!(frame.command_buffer, vk::CommandBuffer::null());
        assert_ne!(frame.picker_command_buffer, vk::CommandBuffer::null());
        assert!((frame.image_idx as usize) < backend.swapchain().image_count());
        assert_eq!(
            backend.swapchain().slot_state(frame.frame_idx).unwrap(),
            SlotState::Recording
        );

        backend.end_frame(&frame).unwrap();
        assert_eq!(
            backend.swapchain().slot_state(frame.frame_idx).unwrap(),
            SlotState::Presented
        );
        slots.push(frame.frame_idx);
    }

    assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    backend.wait_idle().unwrap();
}

#[test]
#[ignore = "requires a Vulkan device"]
fn resize_to_the_current_extent_keeps_the_swapchain_shape() {
    let window = HeadlessWindow::new(800, 600);
    let mut backend = headless_backend(&window);
    render_empty_frame(backend.swapchain_mut());

    let swapchain = backend.swapchain();
    let extent = swapchain.extent();
    let images = swapchain.image_count();
    let slots = swapchain.frame_count();

    backend.resize(extent.width, extent.height).unwrap();

    let swapchain = backend.swapchain_mut();
    assert_eq!(swapchain.extent(), extent);
    assert_eq!(swapchain.image_count(), images);
    assert_eq!(swapchain.frame_count(), slots);
    assert_eq!(swapchain.next_frame_idx(), 0);
    render_empty_frame(swapchain);
    render_empty_frame(swapchain);
    swapchain.device().wait_idle().unwrap();
}

#[test]
#[ignore = "requires a Vulkan device"]
fn resize_replaces_depth_attachments() {
    let window = HeadlessWindow::new(800, 600);
    let mut backend = headless_backend(&window);
    render_empty_frame(backend.swapchain_mut());

    let old_images = backend.swapchain().depth_images();
    let old_views = backend.swapchain().depth_views();

    window.set_size(1024, 768);
    backend.resize(1024, 768).unwrap();

    let swapchain = backend.swapchain_mut();
    assert_eq!(
        swapchain.extent(),
        vk::Extent2D {
            width: 1024,
            height: 768
        }
    );
    let new_images = swapchain.depth_images();
    let new_views = swapchain.depth_views();
    assert_eq!(new_images.len(), swapchain.image_count());
    assert!(new_images.iter().all(|image| !old_images.contains(image)));
    assert!(new_views.iter().all(|view| !old_views.contains(view)));

    let frame = swapchain.begin_frame().unwrap();
    assert_eq!((frame.width, frame.height), (1024, 768));
    swapchain.end_frame(&frame).unwrap();
    swapchain.device().wait_idle().unwrap();
}

#[test]
#[ignore = "requires a Vulkan device"]
fn minimized_window_blocks_resize_until_restored() {
    let window = HeadlessWindow::new(800, 600);
    let mut backend = headless_backend(&window);
    let old_views = backend.swapchain().depth_views();

    window.set_size(0, 0);
    window.restore_after(3, 640, 480);
    backend.swapchain_mut().resize().unwrap();

    let swapchain = backend.swapchain_mut();
    assert_eq!(window.pumps(), 3);
    assert!(!swapchain.is_resize_pending());
    assert_eq!(
        swapchain.extent(),
        vk::Extent2D {
            width: 640,
            height: 480
        }
    );
    assert!(swapchain
        .depth_views()
        .iter()
        .all(|view| !old_views.contains(view)));
    render_empty_frame(swapchain);
    swapchain.device().wait_idle().unwrap();
}

#[test]
#[ignore = "requires a Vulkan device"]
fn zero_sized_window_defers_recreation_without_blocking() {
    let window = HeadlessWindow::driven_externally(800, 600);
    let mut backend = headless_backend(&window);
    render_empty_frame(backend.swapchain_mut());

    window.set_size(0, 0);
    let swapchain = backend.swapchain_mut();
    swapchain.resize().unwrap();
    assert!(swapchain.is_resize_pending());
    assert_eq!(window.pumps(), 0);

    // Every frame is stale while minimized, and slots still cycle.
    let first = swapchain.begin_frame().unwrap();
    let second = swapchain.begin_frame().unwrap();
    assert!(first.is_stale() && second.is_stale());
    assert_eq!(first.command_buffer, vk::CommandBuffer::null());
    assert_ne!(first.frame_idx, second.frame_idx);
    swapchain.end_frame(&first).unwrap();

    window.set_size(640, 480);
    let frame = swapchain.begin_frame().unwrap();
    assert_eq!(frame.status, FrameStatus::Ready);
    assert_eq!((frame.width, frame.height), (640, 480));
    assert!(!swapchain.is_resize_pending());
    swapchain.end_frame(&frame).unwrap();
    assert_eq!(window.pumps(), 0);
    swapchain.device().wait_idle().unwrap();
}

#[test]
#[ignore = "requires a Vulkan device"]
fn slot_fence_follows_its_submission() {
    let window = HeadlessWindow::new(800, 600);
    let mut backend = headless_backend(&window);
    let swapchain = backend.swapchain_mut();

    // Fresh slots start signaled so the first wait returns at once.
    assert!(swapchain.is_slot_idle(0).unwrap());
    assert!(swapchain.is_slot_idle(1).unwrap());

    let frame = swapchain.begin_frame().unwrap();
    assert!(!swapchain.is_slot_idle(frame.frame_idx).unwrap());
    // The other slot is untouched by this frame.
    assert!(swapchain.is_slot_idle(1).unwrap());

    swapchain.end_frame(&frame).unwrap();
    swapchain.device().wait_idle().unwrap();
    assert!(swapchain.is_slot_idle(frame.frame_idx).unwrap());

    // Reusing the slot waits on the signaled fence, then resets it again.
    render_empty_frame(swapchain);
    let reused = swapchain.begin_frame().unwrap();
    assert_eq!(reused.frame_idx, frame.frame_idx);
    assert!(!swapchain.is_slot_idle(reused.frame_idx).unwrap());
    swapchain.end_frame(&reused).unwrap();
    swapchain.device().wait_idle().unwrap();

    assert!(swapchain.is_slot_idle(2).is_err());
}

#[test]
#[ignore = "requires a Vulkan device"]
fn zero_sized_outer_loop_window_cannot_start_a_swapchain() {
    let window = HeadlessWindow::driven_externally(0, 0);
    let config = GpuConfig::new("jetz-swapchain-tests").with_validation(false);
    let presentation: Arc<dyn PresentationWindow> = window.clone();

    let err = VulkanBackend::new(presentation, &config).err().expect("refused");
    assert!(matches!(err, jetz_gpu::GpuError::InvalidState(_)));
    assert_eq!(window.pumps(), 0);

    // The partially built device and surface were released; a fresh start works.
    window.set_size(320, 240);
    let backend = headless_backend(&window);
    assert_eq!(
        backend.swapchain().extent(),
        vk::Extent2D {
            width: 320,
            height: 240
        }
    );
}
