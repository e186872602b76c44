//! Per-slot synchronization objects.

use crate::error::Result;
use ash::vk;

/// The semaphore pair and fence owned by one frame slot.
///
/// `image_available` is signaled by acquire and waited on by the submit,
/// `render_finished` is signaled by the submit and waited on by present, and
/// `in_flight` gates reuse of the slot's command buffers.
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create the slot's objects. The fence starts signaled so the first
    /// wait on a fresh slot returns immediately.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let image_available = device.create_semaphore(&semaphore_info, None)?;
        let render_finished = device
            .create_semaphore(&semaphore_info, None)
            .inspect_err(|_| device.destroy_semaphore(image_available, None))?;
        let in_flight = device.create_fence(&fence_info, None).inspect_err(|_| {
            device.destroy_semaphore(render_finished, None);
            device.destroy_semaphore(image_available, None);
        })?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Block until the slot's previous submission has completed.
    ///
    /// # Safety
    /// The device must be valid.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        device.wait_for_fences(&[self.in_flight], true, u64::MAX)?;
        Ok(())
    }

    /// Unsignal the fence ahead of a submission that will signal it again.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        device.reset_fences(&[self.in_flight])?;
        Ok(())
    }

    /// Whether the slot's fence is signaled, without blocking.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn is_idle(&self, device: &ash::Device) -> Result<bool> {
        Ok(device.get_fence_status(self.in_flight)?)
    }

    /// # Safety
    /// The device must be valid and no submission may still use the objects.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_fence(self.in_flight, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_semaphore(self.image_available, None);
    }
}
