//! # Device seam
//!
//! The core never touches process-wide globals. Everything it needs from the
//! device is reached through a `ComputeContext` passed by reference into each
//! operation: the single queue, the single reusable command buffer, the fence,
//! the two-slot timestamp query pool, the shared descriptor set, and the
//! allocator.
//!
//! Initialization order for the Vulkan implementation is instance -> device ->
//! allocator -> descriptor layout/pool/set -> command pool/buffer -> fence ->
//! query pool, with a single `shutdown()` tearing them down in reverse.

use ash::vk;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::buffers::{BufferHandle, BufferRequest, DescriptorWrite};
use crate::commands::Command;
use crate::error::BenchError;
use crate::ledger::ReleaseFn;
use crate::shader::ShaderCode;

/// Static facts about the device the core consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub api_version: String,
    pub queue_family_index: u32,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period_ns: f32,
    pub timestamp_valid_bits: u32,
}

impl DeviceInfo {
    /// Mask covering the meaningful bits of a raw timestamp.
    pub fn timestamp_mask(&self) -> u64 {
        match self.timestamp_valid_bits {
            0 => 0,
            bits if bits >= 64 => u64::MAX,
            bits => (1u64 << bits) - 1,
        }
    }
}

/// Index into the two-slot timestamp query pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySlot {
    Start = 0,
    End = 1,
}

impl QuerySlot {
    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Compute pipeline plus its layout, owned by one test.
#[derive(Debug, PartialEq, Eq)]
pub struct PipelineHandle {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

pub trait ComputeContext {
    fn device_info(&self) -> &DeviceInfo;

    /// The process-wide descriptor set every test rebinds.
    fn descriptor_set(&self) -> vk::DescriptorSet;

    /// Number of storage-buffer bindings declared by the descriptor layout.
    fn storage_binding_count(&self) -> usize;

    // ---- single reusable command buffer -----------------------------------

    /// Start a one-shot recording; the buffer must be in its reset state.
    fn begin_recording(&mut self) -> Result<(), BenchError>;
    fn write_timestamp(&mut self, stage: vk::PipelineStageFlags, slot: QuerySlot);
    fn record(&mut self, command: &Command);
    fn end_recording(&mut self) -> Result<(), BenchError>;

    // ---- submission ---------------------------------------------------------

    /// Submit the recorded buffer to the queue, signalling the fence.
    fn submit(&mut self) -> Result<(), BenchError>;
    fn wait_for_fence(&mut self, timeout: Duration) -> Result<(), BenchError>;
    fn reset_fence(&mut self) -> Result<(), BenchError>;
    fn reset_command_pool(&mut self) -> Result<(), BenchError>;
    /// Both 64-bit timestamps, waiting until they are available.
    fn read_timestamps(&mut self) -> Result<[u64; 2], BenchError>;
    /// Host-reset both query slots.
    fn reset_queries(&mut self);
    fn wait_idle(&mut self) -> Result<(), BenchError>;
    /// Host-side settle time between submissions; nothing is in flight.
    fn pause(&mut self, duration: Duration);

    // ---- provisioning -------------------------------------------------------

    fn create_buffer(&mut self, request: &BufferRequest) -> Result<BufferHandle, BenchError>;
    fn buffer_release(&self, buffer: &BufferHandle) -> ReleaseFn;
    fn read_buffer(&mut self, buffer: &BufferHandle, dst: &mut [u8]) -> Result<(), BenchError>;
    fn update_descriptors(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);
    fn create_pipeline(
        &mut self,
        shader: &ShaderCode,
        workgroup_size_x: u32,
    ) -> Result<PipelineHandle, BenchError>;
    fn pipeline_release(&self, pipeline: &PipelineHandle) -> ReleaseFn;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(bits: u32) -> DeviceInfo {
        DeviceInfo {
            name: "test".into(),
            api_version: "1.3.0".into(),
            queue_family_index: 0,
            timestamp_period_ns: 1.0,
            timestamp_valid_bits: bits,
        }
    }

    #[test]
    fn test_timestamp_mask() {
        assert_eq!(info(64).timestamp_mask(), u64::MAX);
        assert_eq!(info(36).timestamp_mask(), (1u64 << 36) - 1);
        assert_eq!(info(0).timestamp_mask(), 0);
    }

    #[test]
    fn test_query_slot_indices() {
        assert_eq!(QuerySlot::Start.index(), 0);
        assert_eq!(QuerySlot::End.index(), 1);
    }
}
