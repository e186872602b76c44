//! Presentation surfaces and the window collaborator interface.

use crate::error::{GpuError, Result};
use crate::instance::Instance;
use ash::vk;
use jetz_core::FramebufferSource;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;

/// A window the swapchain can present to.
///
/// Besides the framebuffer size and event pump used while resizing, the
/// window knows which instance extensions it needs and how to create a
/// surface for itself.
pub trait PresentationWindow: FramebufferSource {
    /// Instance extensions required to create a surface for this window.
    fn required_extensions(&self) -> Result<Vec<*const c_char>>;

    /// Create a presentation surface.
    ///
    /// # Safety
    /// The instance must be valid and created with [`Self::required_extensions`].
    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR>;
}

/// Instance extensions needed to present to a window.
pub fn required_extensions_for(window: &impl HasDisplayHandle) -> Result<Vec<*const c_char>> {
    let display = window
        .display_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;

    let extensions = ash_window::enumerate_required_extensions(display.as_raw())?;
    Ok(extensions.to_vec())
}

/// Create a surface from raw window handles.
///
/// # Safety
/// The instance must be valid and the window handles must outlive the surface.
pub unsafe fn create_surface_for<W>(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &W,
) -> Result<vk::SurfaceKHR>
where
    W: HasDisplayHandle + HasWindowHandle,
{
    let display = window
        .display_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
    let window_handle = window
        .window_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

    ash_window::create_surface(
        entry,
        instance,
        display.as_raw(),
        window_handle.as_raw(),
        None,
    )
    .map_err(|e| GpuError::SurfaceCreation(e.to_string()))
}

/// A presentation surface and its extension loader.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
    // Destroyed before the instance it was created from.
    _instance: Arc<Instance>,
}

impl Surface {
    /// Create a surface for a window.
    pub fn new(instance: Arc<Instance>, window: &dyn PresentationWindow) -> Result<Self> {
        let handle = unsafe { window.create_surface(instance.entry(), instance.raw())? };
        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.raw());

        Ok(Self {
            handle,
            loader,
            _instance: instance,
        })
    }

    /// The raw surface handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Whether a queue family of the physical device can present to this surface.
    ///
    /// # Safety
    /// The physical device must belong to the surface's instance.
    pub unsafe fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        Ok(self.loader.get_physical_device_surface_support(
            physical_device,
            queue_family,
            self.handle,
        )?)
    }

    /// Query surface capabilities.
    ///
    /// # Safety
    /// The physical device must belong to the surface's instance.
    pub unsafe fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<SurfaceCapabilities> {
        let capabilities = self
            .loader
            .get_physical_device_surface_capabilities(physical_device, self.handle)?;

        let formats = self
            .loader
            .get_physical_device_surface_formats(physical_device, self.handle)?;

        let present_modes = self
            .loader
            .get_physical_device_surface_present_modes(physical_device, self.handle)?;

        Ok(SurfaceCapabilities {
            capabilities,
            formats,
            present_modes,
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

/// Surface capabilities query result.
#[derive(Debug, Clone)]
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Select the best surface format.
///
/// A single `UNDEFINED` entry means the surface has no preference.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    if let [only] = available {
        if only.format == vk::Format::UNDEFINED {
            return Some(PREFERRED_SURFACE_FORMAT);
        }
    }

    available
        .iter()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| available.first())
        .copied()
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && available.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }
    // FIFO is always supported
    vk::PresentModeKHR::FIFO
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn undefined_surface_format_means_any() {
        let chosen = select_surface_format(&[format(
            vk::Format::UNDEFINED,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )]);
        assert_eq!(chosen, Some(PREFERRED_SURFACE_FORMAT));
    }

    #[test]
    fn surface_format_prefers_bgra_unorm() {
        let available = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            select_surface_format(&available),
            Some(PREFERRED_SURFACE_FORMAT)
        );

        let available = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(select_surface_format(&available), Some(available[0]));
        assert_eq!(select_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_prefers_mailbox_unless_vsync() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(select_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(select_present_mode(&modes, true), vk::PresentModeKHR::FIFO);

        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(select_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_follows_surface_when_defined() {
        let caps = vk::SurfaceCapabilitiesKHR::default()
            .current_extent(vk::Extent2D {
                width: 800,
                height: 600,
            })
            .min_image_extent(vk::Extent2D {
                width: 1,
                height: 1,
            })
            .max_image_extent(vk::Extent2D {
                width: 4096,
                height: 4096,
            });
        assert_eq!(
            calculate_extent(&caps, 1024, 768),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );

        let caps = caps.current_extent(vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        });
        assert_eq!(
            calculate_extent(&caps, 1024, 768),
            vk::Extent2D {
                width: 1024,
                height: 768
            }
        );
        assert_eq!(
            calculate_extent(&caps, 10_000, 0),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );
    }
}
