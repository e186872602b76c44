//! Device memory sub-allocation.
//!
//! Memory is grouped into one [`MemoryPool`] per memory type index. Each pool
//! owns a growing list of large [`Allocation`]s which are carved up with a bump
//! cursor. Sub-regions are never returned: an allocation lives until the
//! allocator is torn down together with the device.

use crate::error::{GpuError, Result};
use ash::vk;

/// Smallest block requested from the driver for a pool.
pub const MIN_ALLOCATION_SIZE: vk::DeviceSize = 256 * 1024 * 1024;

/// How a resource's memory is accessed, which decides its memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryUsage {
    /// Device-local, only reachable through transfers.
    GpuOnly,
    /// Host-visible staging memory.
    CpuOnly,
    /// Written by the CPU, read by the GPU (uniforms, dynamic data).
    CpuToGpu,
    /// Written by the GPU, read back by the CPU.
    GpuToCpu,
}

impl MemoryUsage {
    /// Property flags a memory type must have.
    pub fn required_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            Self::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Self::CpuOnly | Self::CpuToGpu | Self::GpuToCpu => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }

    /// Property flags used to break ties between compatible memory types.
    pub fn preferred_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            Self::GpuOnly | Self::CpuOnly => vk::MemoryPropertyFlags::empty(),
            Self::CpuToGpu => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Self::GpuToCpu => vk::MemoryPropertyFlags::HOST_CACHED,
        }
    }

    /// Whether the CPU can map this memory directly.
    pub fn is_host_visible(self) -> bool {
        self != Self::GpuOnly
    }
}

/// Round `value` up to the next multiple of `alignment`.
///
/// Alignments of 0 and 1 leave the value unchanged.
pub fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// Find the memory type index for a resource.
///
/// Picks the first type allowed by `type_bits` that has both `required` and
/// `preferred` flags, falling back to the first type with `required` alone.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
    preferred: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let candidates = || {
        properties
            .memory_types
            .iter()
            .take(properties.memory_type_count as usize)
            .enumerate()
            .filter(|(i, _)| type_bits & (1 << i) != 0)
    };

    candidates()
        .find(|(_, ty)| ty.property_flags.contains(required | preferred))
        .or_else(|| candidates().find(|(_, ty)| ty.property_flags.contains(required)))
        .map(|(i, _)| i as u32)
        .ok_or(GpuError::NoCompatibleMemoryType {
            type_bits,
            required,
        })
}

/// Provider of raw device memory blocks.
///
/// Implemented by [`ash::Device`]; tests substitute a fake.
pub trait MemorySource {
    /// Allocate `size` bytes from the given memory type.
    fn allocate(&self, memory_type_index: u32, size: vk::DeviceSize) -> Result<vk::DeviceMemory>;

    /// Return a block to the driver.
    fn free(&self, memory: vk::DeviceMemory);
}

impl MemorySource for ash::Device {
    fn allocate(&self, memory_type_index: u32, size: vk::DeviceSize) -> Result<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);

        unsafe { self.allocate_memory(&info, None) }.map_err(|e| {
            GpuError::AllocationFailed(format!(
                "{size} bytes from memory type {memory_type_index}: {e}"
            ))
        })
    }

    fn free(&self, memory: vk::DeviceMemory) {
        unsafe { self.free_memory(memory, None) };
    }
}

/// A single block of device memory with a bump cursor.
#[derive(Debug)]
pub struct Allocation {
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    next_free: vk::DeviceSize,
}

impl Allocation {
    /// The backing device memory.
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Total size of the block.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Offset of the first byte never handed out.
    pub fn next_free(&self) -> vk::DeviceSize {
        self.next_free
    }

    /// Carve `size` bytes at `alignment`, returning the offset if they fit.
    fn carve(&mut self, size: vk::DeviceSize, alignment: vk::DeviceSize) -> Option<vk::DeviceSize> {
        let offset = align_up(self.next_free, alignment);
        let remaining = self.size.checked_sub(offset)?;
        if remaining < size {
            return None;
        }
        self.next_free = offset + size;
        Some(offset)
    }
}

/// A sub-region handed out by the allocator.
///
/// Refers to its block by index, so pools may grow without invalidating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAllocation {
    pub memory_type_index: u32,
    pub allocation_index: usize,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

/// All allocations for one memory type.
#[derive(Debug)]
pub struct MemoryPool {
    memory_type_index: u32,
    allocations: Vec<Allocation>,
}

impl MemoryPool {
    /// Create an empty pool for a memory type.
    pub fn new(memory_type_index: u32) -> Self {
        Self {
            memory_type_index,
            allocations: Vec::new(),
        }
    }

    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Blocks owned by this pool, in creation order.
    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    /// Carve a region from the first allocation with room, growing the pool if none has.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn alloc(
        &mut self,
        source: &(impl MemorySource + ?Sized),
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
        min_allocation_size: vk::DeviceSize,
    ) -> Result<SubAllocation> {
        let found = self
            .allocations
            .iter_mut()
            .enumerate()
            .find_map(|(index, allocation)| {
                allocation.carve(size, alignment).map(|offset| (index, offset))
            });

        let (allocation_index, offset) = match found {
            Some(hit) => hit,
            None => {
                let block_size = size.max(min_allocation_size);
                let memory = source.allocate(self.memory_type_index, block_size)?;
                tracing::debug!(
                    "Memory type {} grew to {} allocations (+{} MiB)",
                    self.memory_type_index,
                    self.allocations.len() + 1,
                    block_size / (1024 * 1024)
                );

                let mut allocation = Allocation {
                    memory,
                    size: block_size,
                    next_free: 0,
                };
                let offset = allocation.carve(size, alignment).ok_or_else(|| {
                    GpuError::AllocationFailed(format!(
                        "{size} bytes at alignment {alignment} do not fit a fresh block"
                    ))
                })?;
                self.allocations.push(allocation);
                (self.allocations.len() - 1, offset)
            }
        };

        Ok(SubAllocation {
            memory_type_index: self.memory_type_index,
            allocation_index,
            offset,
            size,
        })
    }

    /// Free every block in the pool.
    fn release(&mut self, source: &(impl MemorySource + ?Sized)) {
        for allocation in self.allocations.drain(..) {
            source.free(allocation.memory);
        }
    }
}

/// Per-device sub-allocator over all memory types.
#[derive(Debug)]
pub struct MemoryAllocator {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    buffer_image_granularity: vk::DeviceSize,
    min_allocation_size: vk::DeviceSize,
    pools: Vec<MemoryPool>,
}

impl MemoryAllocator {
    /// Create an allocator for a device's memory type table.
    pub fn new(
        memory_properties: vk::PhysicalDeviceMemoryProperties,
        buffer_image_granularity: vk::DeviceSize,
    ) -> Self {
        let pools = (0..memory_properties.memory_type_count)
            .map(MemoryPool::new)
            .collect();

        Self {
            memory_properties,
            buffer_image_granularity,
            min_allocation_size: MIN_ALLOCATION_SIZE,
            pools,
        }
    }

    /// Override the minimum block size requested from the driver.
    pub fn with_min_allocation_size(mut self, size: vk::DeviceSize) -> Self {
        self.min_allocation_size = size;
        self
    }

    pub fn min_allocation_size(&self) -> vk::DeviceSize {
        self.min_allocation_size
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// The pool for a memory type.
    pub fn pool(&self, memory_type_index: u32) -> Option<&MemoryPool> {
        self.pools.get(memory_type_index as usize)
    }

    /// Number of real device allocations across all pools.
    pub fn allocation_count(&self) -> usize {
        self.pools.iter().map(|p| p.allocations.len()).sum()
    }

    /// Carve `size` bytes at `alignment` from a memory type's pool.
    pub fn alloc_in_pool(
        &mut self,
        source: &(impl MemorySource + ?Sized),
        memory_type_index: u32,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
    ) -> Result<SubAllocation> {
        let min_allocation_size = self.min_allocation_size;
        let pool = self
            .pools
            .get_mut(memory_type_index as usize)
            .ok_or_else(|| {
                GpuError::OutOfRange(format!("memory type index {memory_type_index}"))
            })?;
        pool.alloc(source, size, alignment, min_allocation_size)
    }

    /// Allocate memory satisfying a resource's requirements.
    ///
    /// Non-linear (optimal tiling) resources are padded to the buffer-image
    /// granularity so they never share a page with linear ones.
    pub fn alloc_for_requirements(
        &mut self,
        source: &(impl MemorySource + ?Sized),
        requirements: &vk::MemoryRequirements,
        usage: MemoryUsage,
        linear: bool,
    ) -> Result<SubAllocation> {
        let memory_type_index = find_memory_type(
            &self.memory_properties,
            requirements.memory_type_bits,
            usage.required_flags(),
            usage.preferred_flags(),
        )?;

        let (size, alignment) = if linear {
            (requirements.size, requirements.alignment)
        } else {
            let granularity = self.buffer_image_granularity;
            (
                align_up(requirements.size, granularity),
                requirements.alignment.max(granularity),
            )
        };

        self.alloc_in_pool(source, memory_type_index, size, alignment)
    }

    /// Create a buffer and bind it to freshly carved memory.
    pub fn alloc_buffer(
        &mut self,
        device: &ash::Device,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
    ) -> Result<(vk::Buffer, SubAllocation)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let bound = self
            .alloc_for_requirements(device, &requirements, memory_usage, true)
            .and_then(|sub| {
                let memory = self.memory(&sub)?;
                unsafe { device.bind_buffer_memory(buffer, memory, sub.offset)? };
                Ok(sub)
            });

        match bound {
            Ok(sub) => Ok((buffer, sub)),
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                Err(e)
            }
        }
    }

    /// Create an image and bind it to freshly carved memory.
    pub fn alloc_image(
        &mut self,
        device: &ash::Device,
        create_info: &vk::ImageCreateInfo,
        memory_usage: MemoryUsage,
    ) -> Result<(vk::Image, SubAllocation)> {
        let image = unsafe { device.create_image(create_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let linear = create_info.tiling == vk::ImageTiling::LINEAR;

        let bound = self
            .alloc_for_requirements(device, &requirements, memory_usage, linear)
            .and_then(|sub| {
                let memory = self.memory(&sub)?;
                unsafe { device.bind_image_memory(image, memory, sub.offset)? };
                Ok(sub)
            });

        match bound {
            Ok(sub) => Ok((image, sub)),
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                Err(e)
            }
        }
    }

    /// The device memory backing a sub-allocation.
    pub fn memory(&self, sub: &SubAllocation) -> Result<vk::DeviceMemory> {
        self.pools
            .get(sub.memory_type_index as usize)
            .and_then(|pool| pool.allocations.get(sub.allocation_index))
            .map(Allocation::memory)
            .ok_or_else(|| GpuError::InvalidState(format!("dangling sub-allocation {sub:?}")))
    }

    /// Free every block. Resources bound to them must already be destroyed.
    pub fn release_all(&mut self, source: &(impl MemorySource + ?Sized)) {
        for pool in &mut self.pools {
            pool.release(source);
        }
    }
}

/// An image that owns its own device memory.
///
/// Used for swapchain-sized attachments, which are recreated on every resize
/// and would otherwise leak pool space.
#[derive(Debug)]
pub struct DedicatedImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
}

impl DedicatedImage {
    /// Create an image with a dedicated allocation.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        create_info: &vk::ImageCreateInfo,
        usage: MemoryUsage,
    ) -> Result<Self> {
        let image = device.create_image(create_info, None)?;
        let requirements = device.get_image_memory_requirements(image);

        let memory_type_index = match find_memory_type(
            memory_properties,
            requirements.memory_type_bits,
            usage.required_flags(),
            usage.preferred_flags(),
        ) {
            Ok(index) => index,
            Err(e) => {
                device.destroy_image(image, None);
                return Err(e);
            }
        };

        let mut dedicated = vk::MemoryDedicatedAllocateInfo::default().image(image);
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index)
            .push_next(&mut dedicated);

        let memory = match device.allocate_memory(&alloc_info, None) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_image(image, None);
                return Err(GpuError::AllocationFailed(format!(
                    "dedicated image memory ({} bytes): {e}",
                    requirements.size
                )));
            }
        };

        if let Err(e) = device.bind_image_memory(image, memory, 0) {
            device.destroy_image(image, None);
            device.free_memory(memory, None);
            return Err(e.into());
        }

        Ok(Self { image, memory })
    }

    /// Destroy the image and free its memory.
    ///
    /// # Safety
    /// The device must be valid and the image must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;

    /// Hands out fake handles and records every request.
    #[derive(Default)]
    struct FakeMemory {
        allocated: RefCell<Vec<(u32, vk::DeviceSize)>>,
        freed: RefCell<Vec<vk::DeviceMemory>>,
        fail: bool,
    }

    impl MemorySource for FakeMemory {
        fn allocate(&self, memory_type_index: u32, size: vk::DeviceSize) -> Result<vk::DeviceMemory> {
            if self.fail {
                return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            let mut allocated = self.allocated.borrow_mut();
            allocated.push((memory_type_index, size));
            Ok(vk::DeviceMemory::from_raw(allocated.len() as u64))
        }

        fn free(&self, memory: vk::DeviceMemory) {
            self.freed.borrow_mut().push(memory);
        }
    }

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = flags.len() as u32;
        for (i, &f) in flags.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType::default().property_flags(f);
        }
        props
    }

    #[test]
    fn align_up_rounds_to_multiples() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(13, 1), 13);
        assert_eq!(align_up(13, 0), 13);
    }

    #[test]
    fn offsets_respect_alignment_and_bounds() {
        let source = FakeMemory::default();
        let mut pool = MemoryPool::new(0);
        let requests = [(3, 1), (100, 64), (7, 256), (4096, 4096), (1, 16), (999, 512)];

        for &(size, alignment) in &requests {
            let sub = pool.alloc(&source, size, alignment, 16 * 1024).unwrap();
            let allocation = &pool.allocations()[sub.allocation_index];
            assert_eq!(sub.offset % alignment, 0);
            assert!(sub.offset + size <= allocation.size());
        }
    }

    #[test]
    fn sub_allocations_do_not_overlap() {
        let source = FakeMemory::default();
        let mut pool = MemoryPool::new(0);
        let a = pool.alloc(&source, 100, 64, 1024).unwrap();
        let b = pool.alloc(&source, 100, 64, 1024).unwrap();

        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 128);
        assert_eq!(pool.allocations()[0].next_free(), 228);
    }

    #[test]
    fn small_requests_share_one_block() {
        let source = FakeMemory::default();
        let mut pool = MemoryPool::new(3);

        for _ in 0..64 {
            pool.alloc(&source, 1024, 256, MIN_ALLOCATION_SIZE).unwrap();
        }

        assert_eq!(pool.allocations().len(), 1);
        assert_eq!(*source.allocated.borrow(), vec![(3, MIN_ALLOCATION_SIZE)]);
    }

    #[test]
    fn pool_grows_only_when_full() {
        let source = FakeMemory::default();
        let mut pool = MemoryPool::new(0);
        let size = MIN_ALLOCATION_SIZE - 1;

        let first = pool.alloc(&source, size, 1, MIN_ALLOCATION_SIZE).unwrap();
        assert_eq!(first.allocation_index, 0);
        assert_eq!(pool.allocations().len(), 1);

        let second = pool.alloc(&source, size, 1, MIN_ALLOCATION_SIZE).unwrap();
        assert_eq!(second.allocation_index, 1);
        assert_eq!(second.offset, 0);
        assert_eq!(pool.allocations().len(), 2);
    }

    #[test]
    fn first_fit_prefers_earlier_blocks() {
        let source = FakeMemory::default();
        let mut pool = MemoryPool::new(0);

        pool.alloc(&source, 900, 1, 1000).unwrap();
        pool.alloc(&source, 500, 1, 1000).unwrap();
        assert_eq!(pool.allocations().len(), 2);

        // Fits in the tail of the first block.
        let sub = pool.alloc(&source, 100, 1, 1000).unwrap();
        assert_eq!(sub.allocation_index, 0);
        assert_eq!(sub.offset, 900);

        // Only the second block has room left.
        let sub = pool.alloc(&source, 400, 1, 1000).unwrap();
        assert_eq!(sub.allocation_index, 1);
        assert_eq!(sub.offset, 500);
    }

    #[test]
    fn oversized_request_gets_exact_block() {
        let source = FakeMemory::default();
        let mut pool = MemoryPool::new(0);

        pool.alloc(&source, 5000, 1, 1000).unwrap();
        assert_eq!(pool.allocations()[0].size(), 5000);
    }

    #[test]
    fn alignment_padding_past_end_is_skipped() {
        let source = FakeMemory::default();
        let mut pool = MemoryPool::new(0);

        pool.alloc(&source, 1000, 1, 1024).unwrap();
        // Aligned cursor (2048) lies past the block end.
        let sub = pool.alloc(&source, 8, 2048, 1024).unwrap();
        assert_eq!(sub.allocation_index, 1);
        assert_eq!(sub.offset, 0);
    }

    #[test]
    fn failed_growth_leaves_pool_untouched() {
        let source = FakeMemory {
            fail: true,
            ..Default::default()
        };
        let mut pool = MemoryPool::new(0);

        assert!(pool.alloc(&source, 64, 1, 1024).is_err());
        assert!(pool.allocations().is_empty());
    }

    #[test]
    fn memory_type_prefers_then_falls_back() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let device_local = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        let props = memory_properties(&[device_local, host, host | device_local]);

        let usage = MemoryUsage::CpuToGpu;
        let index =
            find_memory_type(&props, 0b111, usage.required_flags(), usage.preferred_flags());
        assert_eq!(index.unwrap(), 2);

        // Preferred type filtered out by the resource.
        let index =
            find_memory_type(&props, 0b011, usage.required_flags(), usage.preferred_flags());
        assert_eq!(index.unwrap(), 1);

        let usage = MemoryUsage::GpuOnly;
        let index =
            find_memory_type(&props, 0b110, usage.required_flags(), usage.preferred_flags());
        assert_eq!(index.unwrap(), 2);

        assert!(matches!(
            find_memory_type(&props, 0b001, host, vk::MemoryPropertyFlags::empty()),
            Err(GpuError::NoCompatibleMemoryType { .. })
        ));
    }

    #[test]
    fn optimal_images_are_padded_to_granularity() {
        let source = FakeMemory::default();
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let mut allocator = MemoryAllocator::new(props, 1024).with_min_allocation_size(1 << 20);

        let buffer = vk::MemoryRequirements::default()
            .size(100)
            .alignment(16)
            .memory_type_bits(1);
        let image = vk::MemoryRequirements::default()
            .size(3000)
            .alignment(256)
            .memory_type_bits(1);

        allocator
            .alloc_for_requirements(&source, &buffer, MemoryUsage::GpuOnly, true)
            .unwrap();
        let img = allocator
            .alloc_for_requirements(&source, &image, MemoryUsage::GpuOnly, false)
            .unwrap();
        let after = allocator
            .alloc_for_requirements(&source, &buffer, MemoryUsage::GpuOnly, true)
            .unwrap();

        assert_eq!(img.offset, 1024);
        assert_eq!(img.size, 3072);
        assert_eq!(after.offset, 4096);
        assert_eq!(allocator.allocation_count(), 1);
    }

    #[test]
    fn release_frees_every_block() {
        let source = FakeMemory::default();
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let mut allocator = MemoryAllocator::new(props, 1).with_min_allocation_size(256);

        allocator.alloc_in_pool(&source, 0, 200, 1).unwrap();
        allocator.alloc_in_pool(&source, 0, 200, 1).unwrap();
        allocator.alloc_in_pool(&source, 1, 10, 1).unwrap();
        assert_eq!(allocator.allocation_count(), 3);
        assert!(allocator.alloc_in_pool(&source, 7, 10, 1).is_err());

        allocator.release_all(&source);
        assert_eq!(source.freed.borrow().len(), 3);
        assert_eq!(allocator.allocation_count(), 0);
    }
}
