//! GPU buffers backed by pool memory.
//!
//! A [`Buffer`] always exposes the same `update` call. Host-visible buffers are
//! written through a map/copy/unmap cycle; device-local ones go through a
//! temporary staging buffer and a blocking transfer.

use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::memory::{align_up, MemoryUsage, SubAllocation};
use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

/// Check that `offset..offset + len` lies within a buffer of `size` bytes.
pub fn check_range(offset: vk::DeviceSize, len: vk::DeviceSize, size: vk::DeviceSize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(GpuError::OutOfRange(format!(
            "{len} bytes at offset {offset} in a buffer of {size} bytes"
        ))),
    }
}

/// A buffer bound to a sub-region of a pool allocation.
///
/// Dropping the buffer destroys the handle; its memory stays with the pool
/// until the device is destroyed.
pub struct Buffer {
    device: Arc<Device>,
    handle: vk::Buffer,
    allocation: SubAllocation,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_usage: MemoryUsage,
}

impl Buffer {
    /// Create a buffer.
    ///
    /// GPU-only buffers always get `TRANSFER_DST` so they can receive staging copies.
    pub fn new(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
    ) -> Result<Self> {
        if size == 0 {
            return Err(GpuError::InvalidState("zero-sized buffer".to_string()));
        }

        let usage = if memory_usage == MemoryUsage::GpuOnly {
            usage | vk::BufferUsageFlags::TRANSFER_DST
        } else {
            usage
        };

        let (handle, allocation) = device.alloc_buffer(size, usage, memory_usage)?;

        Ok(Self {
            device: Arc::clone(device),
            handle,
            allocation,
            size,
            usage,
            memory_usage,
        })
    }

    /// Get the raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Size in bytes.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags the buffer was created with.
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Memory usage class.
    pub fn memory_usage(&self) -> MemoryUsage {
        self.memory_usage
    }

    /// Where the buffer lives inside its pool.
    pub fn allocation(&self) -> &SubAllocation {
        &self.allocation
    }

    /// The device the buffer was created on.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Write `data` at `offset`.
    ///
    /// Once this returns, commands submitted afterwards observe the data.
    /// Device-local buffers stall the graphics queue until the copy finishes.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn update(&self, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        check_range(offset, data.len() as vk::DeviceSize, self.size)?;
        if data.is_empty() {
            return Ok(());
        }

        if self.memory_usage.is_host_visible() {
            self.write_mapped(offset, data)
        } else {
            self.write_staged(offset, data)
        }
    }

    /// Write a plain-old-data value at `offset`.
    pub fn update_pod<T: Pod>(&self, offset: vk::DeviceSize, value: &T) -> Result<()> {
        self.update(offset, bytemuck::bytes_of(value))
    }

    /// Read `len` bytes at `offset` from a host-visible buffer.
    pub fn read(&self, offset: vk::DeviceSize, len: usize) -> Result<Vec<u8>> {
        check_range(offset, len as vk::DeviceSize, self.size)?;
        if !self.memory_usage.is_host_visible() {
            return Err(GpuError::InvalidState(
                "cannot map a GPU-only buffer".to_string(),
            ));
        }

        let mut out = vec![0u8; len];
        if len == 0 {
            return Ok(out);
        }

        // Blocks of one memory object are mapped one at a time
        let allocator = self.device.allocator().lock();
        let memory = allocator.memory(&self.allocation)?;
        let device = self.device.raw();
        unsafe {
            let ptr = device.map_memory(
                memory,
                self.allocation.offset + offset,
                len as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.as_mut_ptr(), len);
            device.unmap_memory(memory);
        }

        Ok(out)
    }

    /// Record and submit a copy from this buffer into `dst`, waiting for it.
    pub fn copy_to(
        &self,
        dst: &Buffer,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<()> {
        check_range(src_offset, size, self.size)?;
        check_range(dst_offset, size, dst.size)?;

        let region = vk::BufferCopy::default()
            .src_offset(src_offset)
            .dst_offset(dst_offset)
            .size(size);

        self.device.one_time_commands(|device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, self.handle, dst.handle, &[region]);
        })
    }

    fn write_mapped(&self, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let allocator = self.device.allocator().lock();
        let memory = allocator.memory(&self.allocation)?;
        let device = self.device.raw();
        unsafe {
            let ptr = device.map_memory(
                memory,
                self.allocation.offset + offset,
                data.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            device.unmap_memory(memory);
        }
        Ok(())
    }

    fn write_staged(&self, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let len = data.len() as vk::DeviceSize;
        tracing::trace!("Staging {len} bytes into buffer {:?} at offset {offset}", self.handle);

        let staging = Self::new(
            &self.device,
            len,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryUsage::CpuOnly,
        )?;
        staging.write_mapped(0, data)?;
        staging.copy_to(self, 0, offset, len)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_buffer(self.handle, None) };
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("memory_usage", &self.memory_usage)
            .field("allocation", &self.allocation)
            .finish()
    }
}

/// Stride of one element in a [`BufferArray`].
pub fn padded_element_size(
    element_size: vk::DeviceSize,
    min_offset_alignment: vk::DeviceSize,
) -> vk::DeviceSize {
    align_up(element_size, min_offset_alignment)
}

/// Fixed-count array of equally sized elements in one buffer.
///
/// Elements are spaced by the device's minimum uniform buffer offset alignment
/// so each one can be bound on its own.
#[derive(Debug)]
pub struct BufferArray {
    buffer: Buffer,
    element_size: vk::DeviceSize,
    padded_size: vk::DeviceSize,
    count: usize,
}

impl BufferArray {
    /// Create an array of `count` elements of `element_size` bytes.
    pub fn new(
        device: &Arc<Device>,
        element_size: vk::DeviceSize,
        count: usize,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
    ) -> Result<Self> {
        let padded_size =
            padded_element_size(element_size, device.gpu().min_uniform_buffer_offset_alignment());
        let buffer = Buffer::new(
            device,
            padded_size * count as vk::DeviceSize,
            usage,
            memory_usage,
        )?;

        Ok(Self {
            buffer,
            element_size,
            padded_size,
            count,
        })
    }

    /// Write element `index`. `data` may be shorter than the element.
    pub fn update(&self, index: usize, data: &[u8]) -> Result<()> {
        let offset = self.offset_of(index)?;
        if data.len() as vk::DeviceSize > self.element_size {
            return Err(GpuError::OutOfRange(format!(
                "{} bytes into an element of {} bytes",
                data.len(),
                self.element_size
            )));
        }
        self.buffer.update(offset, data)
    }

    /// Byte offset of element `index`.
    pub fn offset_of(&self, index: usize) -> Result<vk::DeviceSize> {
        if index >= self.count {
            return Err(GpuError::OutOfRange(format!(
                "element {index} of an array of {}",
                self.count
            )));
        }
        Ok(self.padded_size * index as vk::DeviceSize)
    }

    /// The backing buffer.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Unpadded element size.
    pub fn element_size(&self) -> vk::DeviceSize {
        self.element_size
    }

    /// Distance between consecutive elements.
    pub fn padded_size(&self) -> vk::DeviceSize {
        self.padded_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_checks() {
        assert!(check_range(0, 16, 16).is_ok());
        assert!(check_range(8, 8, 16).is_ok());
        assert!(check_range(16, 0, 16).is_ok());
        assert!(matches!(check_range(9, 8, 16), Err(GpuError::OutOfRange(_))));
        assert!(matches!(
            check_range(u64::MAX, 2, 16),
            Err(GpuError::OutOfRange(_))
        ));
    }

    #[test]
    fn elements_are_padded_to_offset_alignment() {
        assert_eq!(padded_element_size(200, 256), 256);
        assert_eq!(padded_element_size(256, 256), 256);
        assert_eq!(padded_element_size(257, 256), 512);
        assert_eq!(padded_element_size(12, 0), 12);
        assert_eq!(padded_element_size(12, 1), 12);
    }
}
