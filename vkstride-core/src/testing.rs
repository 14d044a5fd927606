//! Recording `ComputeContext` for unit tests.
//!
//! Every trait call is appended to a shared log, including the release
//! closures handed to ledgers, so tests can assert exact call order without a
//! device.

use ash::vk;
use ash::vk::Handle;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::buffers::{Allocation, BufferHandle, BufferRequest, DescriptorWrite};
use crate::commands::Command;
use crate::context::{ComputeContext, DeviceInfo, PipelineHandle, QuerySlot};
use crate::error::BenchError;
use crate::ledger::ReleaseFn;
use crate::shader::ShaderCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    BeginRecording,
    WriteTimestamp(vk::PipelineStageFlags, QuerySlot),
    Record(Command),
    EndRecording,
    Submit,
    WaitForFence(Duration),
    ResetFence,
    ResetCommandPool,
    ReadTimestamps,
    ResetQueries,
    WaitIdle,
    CreateBuffer(u64),
    DestroyBuffer(vk::Buffer),
    ReadBuffer(vk::Buffer),
    UpdateDescriptors(Vec<(u32, vk::Buffer)>),
    CreatePipeline { workgroup_size_x: u32 },
    DestroyPipeline(vk::Pipeline),
    Pause(Duration),
}

type CallLog = Rc<RefCell<Vec<Call>>>;

pub struct MockContext {
    info: DeviceInfo,
    log: CallLog,
    ticks: VecDeque<(u64, u64)>,
    next_id: Cell<u64>,
    host_visible: Vec<vk::Buffer>,
    fence_waits: u32,
    /// Fence waits that succeed before every later one times out.
    timeout_after: Option<u32>,
}

impl MockContext {
    pub fn new() -> Self {
        Self {
            info: DeviceInfo {
                name: "Mock Device".into(),
                api_version: "1.3.0".into(),
                queue_family_index: 0,
                timestamp_period_ns: 1.0,
                timestamp_valid_bits: 64,
            },
            log: Rc::new(RefCell::new(Vec::new())),
            ticks: VecDeque::new(),
            next_id: Cell::new(0),
            host_visible: Vec::new(),
            fence_waits: 0,
            timeout_after: None,
        }
    }

    /// Queue raw (start, end) pairs; reads past the end return (0, 0).
    pub fn with_ticks(mut self, pairs: &[(u64, u64)]) -> Self {
        self.ticks.extend(pairs.iter().copied());
        self
    }

    pub fn with_fence_timeout(self) -> Self {
        self.with_fence_timeout_after(0)
    }

    pub fn with_fence_timeout_after(mut self, successful_waits: u32) -> Self {
        self.timeout_after = Some(successful_waits);
        self
    }

    pub fn with_timestamp_period(mut self, period_ns: f32) -> Self {
        self.info.timestamp_period_ns = period_ns;
        self
    }

    pub fn with_timestamp_bits(mut self, bits: u32) -> Self {
        self.info.timestamp_valid_bits = bits;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.borrow().clone()
    }

    /// Buffers created with host access, in creation order.
    pub fn host_visible_buffers(&self) -> &[vk::Buffer] {
        &self.host_visible
    }

    fn push(&self, call: Call) {
        self.log.borrow_mut().push(call);
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }
}

impl ComputeContext for MockContext {
    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn descriptor_set(&self) -> vk::DescriptorSet {
        vk::DescriptorSet::from_raw(0xD5)
    }

    fn storage_binding_count(&self) -> usize {
        3
    }

    fn begin_recording(&mut self) -> Result<(), BenchError> {
        self.push(Call::BeginRecording);
        Ok(())
    }

    fn write_timestamp(&mut self, stage: vk::PipelineStageFlags, slot: QuerySlot) {
        self.push(Call::WriteTimestamp(stage, slot));
    }

    fn record(&mut self, command: &Command) {
        self.push(Call::Record(*command));
    }

    fn end_recording(&mut self) -> Result<(), BenchError> {
        self.push(Call::EndRecording);
        Ok(())
    }

    fn submit(&mut self) -> Result<(), BenchError> {
        self.push(Call::Submit);
        Ok(())
    }

    fn wait_for_fence(&mut self, timeout: Duration) -> Result<(), BenchError> {
        self.push(Call::WaitForFence(timeout));
        self.fence_waits += 1;
        match self.timeout_after {
            Some(limit) if self.fence_waits > limit => Err(BenchError::FenceTimeout { timeout }),
            _ => Ok(()),
        }
    }

    fn reset_fence(&mut self) -> Result<(), BenchError> {
        self.push(Call::ResetFence);
        Ok(())
    }

    fn reset_command_pool(&mut self) -> Result<(), BenchError> {
        self.push(Call::ResetCommandPool);
        Ok(())
    }

    fn read_timestamps(&mut self) -> Result<[u64; 2], BenchError> {
        self.push(Call::ReadTimestamps);
        let (start, end) = self.ticks.pop_front().unwrap_or((0, 0));
        Ok([start, end])
    }

    fn reset_queries(&mut self) {
        self.push(Call::ResetQueries);
    }

    fn wait_idle(&mut self) -> Result<(), BenchError> {
        self.push(Call::WaitIdle);
        Ok(())
    }

    fn pause(&mut self, duration: Duration) {
        self.push(Call::Pause(duration));
    }

    fn create_buffer(&mut self, request: &BufferRequest) -> Result<BufferHandle, BenchError> {
        self.push(Call::CreateBuffer(request.size));
        let id = self.next_id();
        let host_visible = request.allocation.needs_host_access();
        if host_visible {
            self.host_visible.push(vk::Buffer::from_raw(id));
        }
        Ok(BufferHandle {
            buffer: vk::Buffer::from_raw(id),
            allocation: Allocation {
                memory: vk::DeviceMemory::from_raw(id + 2000),
                memory_type_index: 0,
                size: request.size,
                host_visible,
            },
            size: request.size,
        })
    }

    fn buffer_release(&self, buffer: &BufferHandle) -> ReleaseFn {
        let log = Rc::clone(&self.log);
        let raw = buffer.buffer;
        Box::new(move || log.borrow_mut().push(Call::DestroyBuffer(raw)))
    }

    fn read_buffer(&mut self, buffer: &BufferHandle, dst: &mut [u8]) -> Result<(), BenchError> {
        if !buffer.allocation.host_visible {
            return Err(BenchError::NotHostVisible);
        }
        self.push(Call::ReadBuffer(buffer.buffer));
        dst.fill(0);
        Ok(())
    }

    fn update_descriptors(&mut self, _set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        self.push(Call::UpdateDescriptors(
            writes.iter().map(|w| (w.binding, w.buffer)).collect(),
        ));
    }

    fn create_pipeline(
        &mut self,
        _shader: &ShaderCode,
        workgroup_size_x: u32,
    ) -> Result<PipelineHandle, BenchError> {
        self.push(Call::CreatePipeline { workgroup_size_x });
        let id = self.next_id();
        Ok(PipelineHandle {
            pipeline: vk::Pipeline::from_raw(id),
            layout: vk::PipelineLayout::from_raw(id + 1000),
        })
    }

    fn pipeline_release(&self, pipeline: &PipelineHandle) -> ReleaseFn {
        let log = Rc::clone(&self.log);
        let raw = pipeline.pipeline;
        Box::new(move || log.borrow_mut().push(Call::DestroyPipeline(raw)))
    }
}
