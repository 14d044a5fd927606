//! # Buffer Provisioning
//!
//! Allocates storage buffers through the context's allocator and binds them
//! into the shared descriptor set.
//!
//! ## Binding-order contract
//! `bind_storage_buffers(set, [a, b, out])` writes `a` to binding 0, `b` to
//! binding 1 and `out` to binding 2, i.e. list position == binding index.
//! The shader's declared bindings must match that order: input A -> 0,
//! input B -> 1, output -> 2. Only the buffer count is checked here; a
//! swapped order silently feeds the shader the wrong buffers.

use ash::vk;
use bitflags::bitflags;

use crate::context::ComputeContext;
use crate::error::BenchError;
use crate::ledger::ResourceLedger;

/// Bytes per shader-visible scalar (f32).
pub const SCALAR_BYTES: u64 = 4;

bitflags! {
    /// Host-access intent for an allocation; drives memory-type placement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocationFlags: u32 {
        /// Host writes sequentially through a mapping.
        const HOST_ACCESS_SEQUENTIAL_WRITE = 1 << 0;
        /// Host reads and writes in any order through a mapping.
        const HOST_ACCESS_RANDOM = 1 << 1;
    }
}

impl AllocationFlags {
    pub fn needs_host_access(self) -> bool {
        self.intersects(Self::HOST_ACCESS_SEQUENTIAL_WRITE | Self::HOST_ACCESS_RANDOM)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequest {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub allocation: AllocationFlags,
    /// Property flags the chosen memory type must have.
    pub required_properties: vk::MemoryPropertyFlags,
}

impl BufferRequest {
    /// Storage buffer that can be filled by transfer commands, placed
    /// automatically (device-local when available).
    pub fn storage(size: vk::DeviceSize) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            allocation: AllocationFlags::empty(),
            required_properties: vk::MemoryPropertyFlags::empty(),
        }
    }

    pub fn usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    pub fn allocation(mut self, flags: AllocationFlags) -> Self {
        self.allocation |= flags;
        self
    }

    pub fn require(mut self, properties: vk::MemoryPropertyFlags) -> Self {
        self.required_properties |= properties;
        self
    }
}

/// Allocation token returned by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub memory: vk::DeviceMemory,
    pub memory_type_index: u32,
    pub size: vk::DeviceSize,
    pub host_visible: bool,
}

/// GPU buffer plus its allocation. Owned by the scope that created it and
/// destroyed exactly once through that scope's ledger.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferHandle {
    pub buffer: vk::Buffer,
    pub allocation: Allocation,
    pub size: vk::DeviceSize,
}

/// One storage-buffer descriptor update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub buffer: vk::Buffer,
    pub range: vk::DeviceSize,
}

/// Byte size of a buffer of `element_count` elements, each occupying
/// `element_alignment` scalars.
pub fn buffer_size(element_count: u32, element_alignment: u32) -> vk::DeviceSize {
    element_count as u64 * SCALAR_BYTES * element_alignment as u64
}

/// Create a buffer and register its release in `ledger` before returning.
pub fn create_buffer<C: ComputeContext + ?Sized>(
    ctx: &mut C,
    ledger: &mut ResourceLedger,
    label: &str,
    request: &BufferRequest,
) -> Result<BufferHandle, BenchError> {
    let buffer = ctx.create_buffer(request)?;
    tracing::debug!(
        "{}: {} bytes, usage {:?}, memory type {}",
        label,
        buffer.size,
        request.usage,
        buffer.allocation.memory_type_index
    );
    let release = ctx.buffer_release(&buffer);
    Ok(ledger.acquire(label, buffer, release))
}

/// Descriptor writes mapping list position to binding index.
pub fn descriptor_writes(buffers: &[&BufferHandle]) -> Vec<DescriptorWrite> {
    buffers
        .iter()
        .enumerate()
        .map(|(binding, handle)| DescriptorWrite {
            binding: binding as u32,
            buffer: handle.buffer,
            range: handle.size,
        })
        .collect()
}

/// Bind `buffers` to consecutive bindings of `set`, starting at 0.
pub fn bind_storage_buffers<C: ComputeContext + ?Sized>(
    ctx: &mut C,
    set: vk::DescriptorSet,
    buffers: &[&BufferHandle],
) -> Result<(), BenchError> {
    let expected = ctx.storage_binding_count();
    if buffers.len() != expected {
        return Err(BenchError::BindingCount {
            expected,
            actual: buffers.len(),
        });
    }

    let writes = descriptor_writes(buffers);
    ctx.update_descriptors(set, &writes);
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
