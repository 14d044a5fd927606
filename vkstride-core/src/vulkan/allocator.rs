//! Buffer allocation with automatic memory-type placement.
//!
//! One `vkAllocateMemory` per buffer; the benchmark creates three buffers per
//! test so sub-allocation buys nothing.

use ash::vk;
use std::rc::Rc;

use crate::buffers::{Allocation, AllocationFlags, BufferHandle, BufferRequest};
use crate::error::{BenchError, VkResultExt};
use crate::ledger::ReleaseFn;

pub struct Allocator {
    device: Rc<ash::Device>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

/// Property flags a request must have, and the ones it would like.
pub fn placement(request: &BufferRequest) -> (vk::MemoryPropertyFlags, vk::MemoryPropertyFlags) {
    let mut required = request.required_properties;
    let preferred = if request.allocation.needs_host_access() {
        required |= vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        if request.allocation.contains(AllocationFlags::HOST_ACCESS_RANDOM) {
            vk::MemoryPropertyFlags::HOST_CACHED
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        }
    } else {
        vk::MemoryPropertyFlags::DEVICE_LOCAL
    };
    (required, preferred)
}

/// Pick a memory type index allowed by `type_bits`.
///
/// The first type with both required and preferred flags wins; otherwise the
/// first type with the required flags.
pub fn select_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    request: &BufferRequest,
) -> Result<u32, BenchError> {
    let (required, preferred) = placement(request);
    let count = (properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);

    let candidates = || {
        properties.memory_types[..count]
            .iter()
            .enumerate()
            .filter(move |(i, _)| type_bits & (1 << *i) != 0)
            .filter(move |(_, t)| t.property_flags.contains(required))
    };

    candidates()
        .find(|(_, t)| t.property_flags.contains(preferred))
        .or_else(|| candidates().next())
        .map(|(i, _)| i as u32)
        .ok_or(BenchError::NoSuitableMemoryType { type_bits, required })
}

impl Allocator {
    pub fn new(device: Rc<ash::Device>, memory_properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self {
            device,
            memory_properties,
        }
    }

    fn type_flags(&self, index: u32) -> vk::MemoryPropertyFlags {
        self.memory_properties.memory_types[index as usize].property_flags
    }

    /// Create, allocate, and bind. Partial objects are destroyed on failure.
    pub fn create_buffer(&self, request: &BufferRequest) -> Result<BufferHandle, BenchError> {
        let info = vk::BufferCreateInfo::default()
            .size(request.size)
            .usage(request.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None) }.vk_op("create_buffer")?;

        match self.allocate_and_bind(buffer, request) {
            Ok(allocation) => Ok(BufferHandle {
                buffer,
                allocation,
                size: request.size,
            }),
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                Err(e)
            }
        }
    }

    fn allocate_and_bind(&self, buffer: vk::Buffer, request: &BufferRequest) -> Result<Allocation, BenchError> {
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory_type_index =
            select_memory_type(&self.memory_properties, requirements.memory_type_bits, request)?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { self.device.allocate_memory(&alloc_info, None) }.map_err(|code| match code {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                BenchError::OutOfDeviceMemory {
                    size: requirements.size,
                    code,
                }
            }
            code => BenchError::Device {
                op: "allocate_memory",
                code,
            },
        })?;

        if let Err(e) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) }.vk_op("bind_buffer_memory") {
            unsafe { self.device.free_memory(memory, None) };
            return Err(e);
        }

        Ok(Allocation {
            memory,
            memory_type_index,
            size: requirements.size,
            host_visible: self
                .type_flags(memory_type_index)
                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
        })
    }

    pub fn release(&self, handle: &BufferHandle) -> ReleaseFn {
        let device = Rc::clone(&self.device);
        let (buffer, memory) = (handle.buffer, handle.allocation.memory);
        Box::new(move || unsafe {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
        })
    }

    /// Copy the start of a host-visible buffer into `dst`.
    pub fn read(&self, handle: &BufferHandle, dst: &mut [u8]) -> Result<(), BenchError> {
        if !handle.allocation.host_visible {
            return Err(BenchError::NotHostVisible);
        }
        let len = (dst.len() as vk::DeviceSize).min(handle.size);
        if len == 0 {
            return Ok(());
        }

        let memory = handle.allocation.memory;
        unsafe {
            let ptr = self
                .device
                .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                .vk_op("map_memory")?;

            if !self
                .type_flags(handle.allocation.memory_type_index)
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
            {
                let range = vk::MappedMemoryRange::default()
                    .memory(memory)
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                if let Err(e) = self
                    .device
                    .invalidate_mapped_memory_ranges(std::slice::from_ref(&range))
                    .vk_op("invalidate_mapped_memory_ranges")
                {
                    self.device.unmap_memory(memory);
                    return Err(e);
                }
            }

            std::ptr::copy_nonoverlapping(ptr as *const u8, dst.as_mut_ptr(), len as usize);
            self.device.unmap_memory(memory);
        }
        Ok(())
    }
}
