//! Device buffers with host mapping support.

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use super::context::{Context, GpuError, VkResultExt};
use super::handle::DeviceHandle;

/// Where a buffer's memory should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUsage {
    /// GPU-only memory.
    DeviceLocal,
    /// Host-visible memory written by the host and read by the GPU.
    Upload,
    /// Host-visible memory written by the GPU and read by the host.
    Readback,
}

impl MemoryUsage {
    /// Property sets to try in order; the last one is the minimum requirement.
    fn candidates(self) -> Vec<vk::MemoryPropertyFlags> {
        use vk::MemoryPropertyFlags as F;
        match self {
            MemoryUsage::DeviceLocal => vec![F::DEVICE_LOCAL, F::empty()],
            MemoryUsage::Upload => vec![
                F::DEVICE_LOCAL | F::HOST_VISIBLE | F::HOST_COHERENT,
                F::HOST_VISIBLE | F::HOST_COHERENT,
                F::HOST_VISIBLE,
            ],
            MemoryUsage::Readback => vec![
                F::HOST_VISIBLE | F::HOST_CACHED | F::HOST_COHERENT,
                F::HOST_VISIBLE | F::HOST_COHERENT,
                F::HOST_VISIBLE,
            ],
        }
    }
}

struct Mapping {
    ptr: NonNull<u8>,
    offset: u64,
    size: u64,
    persistent: bool,
}

/// Flush/invalidate range for `offset..offset + size` inside a mapping of
/// `mapped_offset..mapped_end`, widened to whole atoms.
///
/// Returns `(start, len)`, with `len` set to `vk::WHOLE_SIZE` when the
/// rounded end would reach past the mapping.
fn atom_aligned_range(offset: u64, size: u64, atom: u64, mapped_offset: u64, mapped_end: u64) -> (u64, u64) {
    let start = (offset / atom * atom).max(mapped_offset);
    let end = (offset + size).div_ceil(atom) * atom;
    if end >= mapped_end {
        (start, vk::WHOLE_SIZE)
    } else {
        (start, end - start)
    }
}

/// A `VkBuffer` with its own memory allocation.
///
/// Pipelines borrow buffers for descriptor binding; only the owner releases them.
pub struct Buffer {
    mapping: Option<Mapping>,
    buffer: DeviceHandle<vk::Buffer>,
    memory: DeviceHandle<vk::DeviceMemory>,
    size: u64,
    properties: vk::MemoryPropertyFlags,
}

// The mapped pointer is only dereferenced through `&mut self`.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    pub fn new(
        context: &Arc<Context>,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
    ) -> Result<Self, GpuError> {
        let device = context.device();
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            let raw = device.create_buffer(&info, None).vk("vkCreateBuffer")?;
            DeviceHandle::from_raw(context, raw)
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer.raw()) };
        let candidates = memory_usage.candidates();
        let (type_index, properties) = candidates
            .iter()
            .find_map(|&flags| context.find_memory_type(requirements.memory_type_bits, flags))
            .ok_or(GpuError::NoMemoryType {
                type_bits: requirements.memory_type_bits,
                properties: candidates.last().copied().unwrap_or_default(),
            })?;

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(type_index);
        let memory = unsafe {
            let raw = device
                .allocate_memory(&allocate_info, None)
                .vk("vkAllocateMemory")?;
            DeviceHandle::from_raw(context, raw)
        };
        unsafe { device.bind_buffer_memory(buffer.raw(), memory.raw(), 0) }
            .vk("vkBindBufferMemory")?;

        Ok(Self {
            mapping: None,
            buffer,
            memory,
            size,
            properties,
        })
    }

    pub fn raw(&self) -> vk::Buffer {
        self.buffer.raw()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    pub fn is_coherent(&self) -> bool {
        self.properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Descriptor covering the whole buffer.
    pub fn descriptor(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.raw())
            .offset(0)
            .range(vk::WHOLE_SIZE)
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<(), GpuError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(GpuError::OutOfRange {
                offset,
                len,
                capacity: self.size,
            }),
        }
    }

    /// Map `size` bytes at `offset` for host access.
    pub fn map(&mut self, offset: u64, size: u64) -> Result<NonNull<u8>, GpuError> {
        self.check_range(offset, size)?;
        if self.mapping.is_some() {
            return Err(GpuError::AlreadyMapped);
        }
        let ptr = unsafe {
            self.buffer.context().device().map_memory(
                self.memory.raw(),
                offset,
                size,
                vk::MemoryMapFlags::empty(),
            )
        }
        .vk("vkMapMemory")?;
        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or(GpuError::Vulkan {
            call: "vkMapMemory",
            result: vk::Result::ERROR_MEMORY_MAP_FAILED,
        })?;
        self.mapping = Some(Mapping {
            ptr,
            offset,
            size,
            persistent: false,
        });
        Ok(ptr)
    }

    pub fn unmap(&mut self) {
        if self.mapping.take().is_some() {
            unsafe { self.buffer.context().device().unmap_memory(self.memory.raw()) };
        }
    }

    /// Map the whole buffer and keep it mapped for later copies.
    pub fn map_persistent(&mut self) -> Result<(), GpuError> {
        match &mut self.mapping {
            Some(mapping) if mapping.offset == 0 && mapping.size == self.size => {
                mapping.persistent = true;
                Ok(())
            }
            Some(_) => Err(GpuError::AlreadyMapped),
            None => {
                self.map(0, self.size)?;
                if let Some(mapping) = &mut self.mapping {
                    mapping.persistent = true;
                }
                Ok(())
            }
        }
    }

    fn atom_range(&self, offset: u64, size: u64) -> vk::MappedMemoryRange<'static> {
        let atom = self.buffer.context().non_coherent_atom_size();
        let (mapped_offset, mapped_end) = self
            .mapping
            .as_ref()
            .map_or((0, self.size), |mapping| (mapping.offset, mapping.offset + mapping.size));
        let (start, size) = atom_aligned_range(offset, size, atom, mapped_offset, mapped_end);
        vk::MappedMemoryRange::default()
            .memory(self.memory.raw())
            .offset(start)
            .size(size)
    }

    /// Make host writes in the range visible to the device. No-op on coherent memory.
    pub fn flush(&self, offset: u64, size: u64) -> Result<(), GpuError> {
        if self.is_coherent() {
            return Ok(());
        }
        let range = self.atom_range(offset, size);
        unsafe {
            self.buffer
                .context()
                .device()
                .flush_mapped_memory_ranges(&[range])
        }
        .vk("vkFlushMappedMemoryRanges")
    }

    /// Make device writes in the range visible to the host. No-op on coherent memory.
    pub fn invalidate(&self, offset: u64, size: u64) -> Result<(), GpuError> {
        if self.is_coherent() {
            return Ok(());
        }
        let range = self.atom_range(offset, size);
        unsafe {
            self.buffer
                .context()
                .device()
                .invalidate_mapped_memory_ranges(&[range])
        }
        .vk("vkInvalidateMappedMemoryRanges")
    }

    /// Copy `data` into the buffer at byte `offset`.
    pub fn copy_from<T: Pod>(&mut self, data: &[T], offset: u64) -> Result<(), GpuError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.access(offset, bytes.len() as u64, true, |ptr| unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        })
    }

    /// Copy from the buffer at byte `offset` into `data`.
    pub fn copy_to<T: Pod>(&mut self, data: &mut [T], offset: u64) -> Result<(), GpuError> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(data);
        let len = bytes.len();
        let dst = bytes.as_mut_ptr();
        self.access(offset, len as u64, false, |ptr| unsafe {
            std::ptr::copy_nonoverlapping(ptr as *const u8, dst, len);
        })
    }

    fn access(
        &mut self,
        offset: u64,
        len: u64,
        write: bool,
        copy: impl FnOnce(*mut u8),
    ) -> Result<(), GpuError> {
        self.check_range(offset, len)?;
        if len == 0 {
            return Ok(());
        }

        let transient = match &self.mapping {
            Some(mapping) if mapping.persistent => false,
            Some(_) => return Err(GpuError::AlreadyMapped),
            None => {
                self.map(0, self.size)?;
                true
            }
        };
        let base = match &self.mapping {
            Some(mapping) => mapping.ptr.as_ptr().wrapping_add((offset - mapping.offset) as usize),
            None => return Err(GpuError::AlreadyMapped),
        };

        let result = if write {
            copy(base);
            self.flush(offset, len)
        } else {
            self.invalidate(offset, len).map(|()| copy(base))
        };

        if transient {
            self.unmap();
        }
        result
    }
}
