//! Physical device discovery and cached capabilities.

use crate::error::{GpuError, Result};
use crate::instance::Instance;
use crate::surface::{select_present_mode, select_surface_format, Surface};
use ash::vk;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Queue families used by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Whether a depth format carries a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// A selected physical device and everything queried from it.
///
/// Immutable after discovery.
#[derive(Debug, Clone)]
pub struct Gpu {
    pub physical_device: vk::PhysicalDevice,
    pub vendor: GpuVendor,
    pub device_name: String,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilies,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub depth_format: vk::Format,
}

impl Gpu {
    /// Select the best physical device able to present to `surface`.
    ///
    /// Without a surface, any device with a graphics queue qualifies and the
    /// present family is the graphics family.
    pub fn select(instance: &Instance, surface: Option<&Surface>, vsync: bool) -> Result<Self> {
        let devices = unsafe { instance.raw().enumerate_physical_devices()? };

        let mut best: Option<(i32, Self)> = None;
        for physical_device in devices {
            let gpu = match unsafe { Self::query(instance, physical_device, surface, vsync) } {
                Ok(gpu) => gpu,
                Err(e) => {
                    tracing::debug!("Skipping physical device: {e}");
                    continue;
                }
            };

            let score = gpu.score();
            if best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, gpu));
            }
        }

        let (_, gpu) = best.ok_or(GpuError::NoSuitableDevice)?;
        tracing::info!("Selected GPU: {}", gpu.summary());
        Ok(gpu)
    }

    /// Query a physical device, failing if it cannot run the engine.
    ///
    /// # Safety
    /// The physical device must belong to the instance.
    pub unsafe fn query(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        surface: Option<&Surface>,
        vsync: bool,
    ) -> Result<Self> {
        let raw = instance.raw();
        let properties = raw.get_physical_device_properties(physical_device);
        let features = raw.get_physical_device_features(physical_device);
        let memory_properties = raw.get_physical_device_memory_properties(physical_device);
        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let queue_families = find_queue_families(raw, physical_device, surface)?;

        let (surface_formats, present_modes) = match surface {
            Some(surface) => {
                let extensions = raw.enumerate_device_extension_properties(physical_device)?;
                let has_swapchain = extensions.iter().any(|ext| {
                    CStr::from_ptr(ext.extension_name.as_ptr()) == ash::khr::swapchain::NAME
                });
                if !has_swapchain {
                    return Err(GpuError::InvalidState(format!(
                        "{device_name} lacks VK_KHR_swapchain"
                    )));
                }

                let caps = surface.capabilities(physical_device)?;
                if caps.formats.is_empty() || caps.present_modes.is_empty() {
                    return Err(GpuError::InvalidState(format!(
                        "{device_name} cannot present to the surface"
                    )));
                }
                (caps.formats, caps.present_modes)
            }
            None => (Vec::new(), Vec::new()),
        };

        let surface_format = select_surface_format(&surface_formats).unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
        let present_mode = select_present_mode(&present_modes, vsync);
        let depth_format = find_depth_format(|format| {
            raw.get_physical_device_format_properties(physical_device, format)
        })?;

        Ok(Self {
            physical_device,
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            properties,
            features,
            memory_properties,
            queue_families,
            surface_formats,
            present_modes,
            surface_format,
            present_mode,
            depth_format,
        })
    }

    /// Whether anisotropic filtering can be enabled.
    pub fn supports_sampler_anisotropy(&self) -> bool {
        self.features.sampler_anisotropy == vk::TRUE
    }

    /// Alignment required between uniform buffer offsets.
    pub fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }

    /// Device-local memory in MB.
    pub fn device_local_memory_mb(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum()
    }

    fn score(&self) -> i32 {
        let mut score = match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
            _ => 0,
        };
        // +1 per GB
        score += i32::try_from(self.device_local_memory_mb() / 1024).unwrap_or(i32::MAX / 2);
        score
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        let api_version = self.properties.api_version;
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(api_version),
            vk::api_version_minor(api_version),
            vk::api_version_patch(api_version),
            self.device_local_memory_mb(),
        )
    }
}

/// Find graphics and present queue families.
///
/// # Safety
/// The physical device must belong to the instance.
unsafe fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: Option<&Surface>,
) -> Result<QueueFamilies> {
    let families = instance.get_physical_device_queue_family_properties(physical_device);

    let mut graphics = None;
    let mut present = None;
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics.is_none() {
            graphics = Some(i);
        }

        let can_present = match surface {
            Some(surface) => surface.supports_present(physical_device, i)?,
            None => family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
        };
        if can_present && present.is_none() {
            present = Some(i);
        }
    }

    match (graphics, present) {
        (Some(graphics), Some(present)) => Ok(QueueFamilies { graphics, present }),
        _ => Err(GpuError::NoSuitableDevice),
    }
}

/// First depth candidate usable as an optimally tiled depth attachment.
pub fn find_depth_format(
    mut format_properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| {
            format_properties(format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(GpuError::NoDepthFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn unique_queue_families() {
        let shared = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        assert_eq!(shared.unique(), vec![0]);

        let split = QueueFamilies {
            graphics: 0,
            present: 2,
        };
        assert_eq!(split.unique(), vec![0, 2]);
    }

    #[test]
    fn depth_format_takes_first_supported() {
        let depth = vk::FormatProperties::default()
            .optimal_tiling_features(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT);

        let chosen = find_depth_format(|format| {
            if format == vk::Format::D24_UNORM_S8_UINT {
                depth
            } else {
                vk::FormatProperties::default()
            }
        });
        assert_eq!(chosen.unwrap(), vk::Format::D24_UNORM_S8_UINT);

        let chosen = find_depth_format(|_| depth);
        assert_eq!(chosen.unwrap(), vk::Format::D32_SFLOAT);

        assert!(matches!(
            find_depth_format(|_| vk::FormatProperties::default()),
            Err(GpuError::NoDepthFormat)
        ));
    }

    #[test]
    fn stencil_detection() {
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
    }
}
