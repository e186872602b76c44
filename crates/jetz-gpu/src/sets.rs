//! Per-view and material descriptor sets.
//!
//! Both kinds hold one uniform slot and one descriptor set per frame slot, so
//! the CPU can update slot `k` while the GPU still reads the other slots.

use crate::buffer::BufferArray;
use crate::descriptors::{write_combined_image_sampler, write_uniform_buffer};
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::memory::MemoryUsage;
use ash::vk;
use bytemuck::Pod;
use glam::{Mat4, Vec3, Vec4};
use jetz_core::constants::FRAMES_IN_FLIGHT;
use jetz_core::FramebufferSize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Vertical field of view of the per-view projection.
pub const FOV_Y: f32 = std::f32::consts::FRAC_PI_4;
/// Near clip plane distance.
pub const Z_NEAR: f32 = 0.1;
/// Far clip plane distance.
pub const Z_FAR: f32 = 1000.0;

/// Set index of per-view sets in pipeline layouts.
pub const PER_VIEW_SET: u32 = 0;
/// Set index of material sets in pipeline layouts.
pub const MATERIAL_SET: u32 = 1;

/// Camera data uploaded for every view.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PerViewUbo {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
}

impl PerViewUbo {
    /// Build view and projection for a camera looking along `direction`.
    ///
    /// The projection flips Y to match Vulkan clip space.
    pub fn new(position: Vec3, direction: Vec3, up: Vec3, size: FramebufferSize) -> Self {
        let view = Mat4::look_to_rh(position, direction, up);
        let mut proj = Mat4::perspective_rh(FOV_Y, size.aspect_ratio(), Z_NEAR, Z_FAR);
        proj.y_axis.y *= -1.0;

        Self {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            camera_pos: position.extend(1.0).to_array(),
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.proj)
    }
}

/// Material lighting terms.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUbo {
    pub ambient: [f32; 4],
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
}

impl MaterialUbo {
    pub fn new(ambient: Vec4, diffuse: Vec4, specular: Vec4) -> Self {
        Self {
            ambient: ambient.to_array(),
            diffuse: diffuse.to_array(),
            specular: specular.to_array(),
        }
    }
}

impl Default for MaterialUbo {
    fn default() -> Self {
        Self::new(Vec4::splat(0.1), Vec4::ONE, Vec4::ZERO)
    }
}

/// One uniform element and one descriptor set per frame slot.
struct SlotSets<T> {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    uniforms: BufferArray,
    sets: Vec<vk::DescriptorSet>,
    set_index: u32,
    _marker: PhantomData<T>,
}

impl<T: Pod> SlotSets<T> {
    fn new(device: &Arc<Device>, material: bool) -> Result<Self> {
        let descriptors = if material {
            device.material_descriptors()
        } else {
            device.per_view_descriptors()
        };

        let element_size = std::mem::size_of::<T>() as vk::DeviceSize;
        let uniforms = BufferArray::new(
            device,
            element_size,
            FRAMES_IN_FLIGHT,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryUsage::CpuToGpu,
        )?;
        let sets = unsafe { descriptors.allocate(device.raw(), FRAMES_IN_FLIGHT)? };

        for (slot, &set) in sets.iter().enumerate() {
            let offset = uniforms.offset_of(slot)?;
            unsafe {
                write_uniform_buffer(
                    device.raw(),
                    set,
                    0,
                    uniforms.buffer().handle(),
                    offset,
                    element_size,
                );
            }
        }

        Ok(Self {
            device: Arc::clone(device),
            pool: descriptors.pool().handle(),
            uniforms,
            sets,
            set_index: if material { MATERIAL_SET } else { PER_VIEW_SET },
            _marker: PhantomData,
        })
    }

    fn set(&self, frame_idx: usize) -> Result<vk::DescriptorSet> {
        self.sets
            .get(frame_idx)
            .copied()
            .ok_or_else(|| GpuError::OutOfRange(format!("frame slot {frame_idx}")))
    }

    fn update(&self, frame_idx: usize, value: &T) -> Result<()> {
        self.uniforms.update(frame_idx, bytemuck::bytes_of(value))
    }

    fn bind(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        frame_idx: usize,
    ) -> Result<()> {
        let set = self.set(frame_idx)?;
        unsafe {
            self.device.raw().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                self.set_index,
                &[set],
                &[],
            );
        }
        Ok(())
    }
}

impl<T> Drop for SlotSets<T> {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.raw().free_descriptor_sets(self.pool, &self.sets) } {
            tracing::warn!("Failed to free descriptor sets: {e}");
        }
    }
}

/// Camera uniforms and descriptor sets for one view.
pub struct PerViewSet {
    inner: SlotSets<PerViewUbo>,
}

impl PerViewSet {
    pub fn new(device: &Arc<Device>) -> Result<Self> {
        Ok(Self {
            inner: SlotSets::new(device, false)?,
        })
    }

    /// Write the uniforms read by frame slot `frame_idx`.
    pub fn update(&self, frame_idx: usize, ubo: &PerViewUbo) -> Result<()> {
        self.inner.update(frame_idx, ubo)
    }

    /// Bind the slot's set at index 0.
    pub fn bind(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        frame_idx: usize,
    ) -> Result<()> {
        self.inner.bind(cmd, layout, frame_idx)
    }

    /// Descriptor set of a frame slot.
    pub fn set(&self, frame_idx: usize) -> Result<vk::DescriptorSet> {
        self.inner.set(frame_idx)
    }
}

/// Material uniforms, texture and descriptor sets.
pub struct MaterialSet {
    inner: SlotSets<MaterialUbo>,
}

impl MaterialSet {
    /// Create the sets, binding `texture_view` with the device sampler.
    ///
    /// The texture must be in `SHADER_READ_ONLY_OPTIMAL` when drawn.
    pub fn new(device: &Arc<Device>, texture_view: vk::ImageView) -> Result<Self> {
        let inner = SlotSets::new(device, true)?;
        for &set in &inner.sets {
            unsafe {
                write_combined_image_sampler(device.raw(), set, 1, texture_view, device.sampler());
            }
        }
        Ok(Self { inner })
    }

    /// Write the uniforms read by frame slot `frame_idx`.
    pub fn update(&self, frame_idx: usize, ubo: &MaterialUbo) -> Result<()> {
        self.inner.update(frame_idx, ubo)
    }

    /// Bind the slot's set at index 1.
    pub fn bind(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        frame_idx: usize,
    ) -> Result<()> {
        self.inner.bind(cmd, layout, frame_idx)
    }

    /// Descriptor set of a frame slot.
    pub fn set(&self, frame_idx: usize) -> Result<vk::DescriptorSet> {
        self.inner.set(frame_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ubo_layouts_match_std140() {
        assert_eq!(std::mem::size_of::<PerViewUbo>(), 144);
        assert_eq!(std::mem::size_of::<MaterialUbo>(), 48);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let ubo = PerViewUbo::new(
            Vec3::ZERO,
            Vec3::NEG_Z,
            Vec3::Y,
            FramebufferSize::new(800, 600),
        );
        let proj = ubo.projection_matrix();
        let unflipped = Mat4::perspective_rh(FOV_Y, 800.0 / 600.0, Z_NEAR, Z_FAR);

        assert_relative_eq!(proj.y_axis.y, -unflipped.y_axis.y);
        assert_relative_eq!(proj.x_axis.x, unflipped.x_axis.x);

        // A point above the camera lands in the upper half of Vulkan clip space
        let clip = proj * Vec4::new(0.0, 1.0, -10.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn view_moves_camera_to_origin() {
        let position = Vec3::new(1.0, 2.0, 3.0);
        let ubo = PerViewUbo::new(position, Vec3::NEG_Z, Vec3::Y, FramebufferSize::new(4, 4));

        let eye = ubo.view_matrix() * position.extend(1.0);
        assert_relative_eq!(eye.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(eye.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(eye.z, 0.0, epsilon = 1e-5);
        assert_eq!(ubo.camera_pos, [1.0, 2.0, 3.0, 1.0]);
    }

    #[test]
    fn zero_sized_view_still_builds_a_projection() {
        let ubo = PerViewUbo::new(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, FramebufferSize::new(0, 0));
        assert!(ubo.projection_matrix().is_finite());
    }
}
