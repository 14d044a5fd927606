//! # Vulkan Context
//!
//! Production `ComputeContext`: one instance, one device, one compute queue,
//! one command pool with a single primary buffer, one fence, a two-slot
//! timestamp query pool and one descriptor set with three storage bindings.
//!
//! Every object is registered in the process-lifetime ledger the moment it is
//! created; `shutdown()` waits for idle and drains it in reverse.

mod allocator;
mod instance;
mod pipeline;

pub use allocator::{placement, select_memory_type, Allocator};
pub use instance::pick_queue_family;
pub use pipeline::WORKGROUP_SIZE_X_CONSTANT_ID;

use ash::vk;
use std::rc::Rc;
use std::time::Duration;

use crate::buffers::{BufferHandle, BufferRequest, DescriptorWrite};
use crate::commands::Command;
use crate::config::BenchConfig;
use crate::context::{ComputeContext, DeviceInfo, PipelineHandle, QuerySlot};
use crate::error::{BenchError, VkResultExt};
use crate::ledger::{ReleaseFn, ResourceLedger};
use crate::shader::ShaderCode;

/// Storage bindings in the shared layout: input A, input B, output.
pub const STORAGE_BINDINGS: u32 = 3;
/// Start and end timestamp.
pub const QUERY_COUNT: u32 = 2;

pub struct VulkanContext {
    info: DeviceInfo,
    device: Rc<ash::Device>,
    queue: vk::Queue,
    allocator: Allocator,
    descriptor_set: vk::DescriptorSet,
    set_layout: vk::DescriptorSetLayout,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    query_pool: vk::QueryPool,
    ledger: ResourceLedger,
}

impl VulkanContext {
    /// Bring up the whole device context.
    ///
    /// On failure the objects created so far are released before returning;
    /// nothing has been submitted yet so the device is idle.
    pub fn new(config: &BenchConfig) -> Result<Self, BenchError> {
        let mut ledger = ResourceLedger::new("global");
        match Self::bootstrap(config, &mut ledger) {
            Ok(ctx) => Ok(ctx),
            Err(e) => {
                ledger.release_all();
                Err(e)
            }
        }
    }

    fn bootstrap(config: &BenchConfig, ledger: &mut ResourceLedger) -> Result<Self, BenchError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| BenchError::Loader(e.to_string()))?;

        // Instance (+ messenger)
        let (instance, validation) = instance::create_instance(&entry, config.validation)?;
        {
            let instance = instance.clone();
            // The entry travels with the instance so the loader outlives it.
            let entry = entry.clone();
            ledger.defer("instance", move || unsafe {
                instance.destroy_instance(None);
                drop(entry);
            });
        }
        if validation {
            let messenger = instance::create_debug_messenger(&entry, &instance)?;
            ledger.defer("debug messenger", move || unsafe {
                messenger
                    .loader
                    .destroy_debug_utils_messenger(messenger.messenger, None);
            });
            tracing::info!("Validation layer enabled");
        }

        // Device + queue
        let choice = instance::select_physical_device(&instance)?;
        let family = choice.info.queue_family_index;
        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(family)
            .queue_priorities(&priorities);
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default().host_query_reset(true);
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .push_next(&mut features12);
        let device = unsafe { instance.create_device(choice.physical, &device_info, None) }
            .vk_op("create_device")?;
        let device = Rc::new(device);
        {
            let device = Rc::clone(&device);
            ledger.defer("device", move || unsafe { device.destroy_device(None) });
        }
        let queue = unsafe { device.get_device_queue(family, 0) };

        let allocator = Allocator::new(Rc::clone(&device), choice.memory_properties);

        // Descriptor layout, pool, set
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..STORAGE_BINDINGS)
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .vk_op("create_descriptor_set_layout")?;
        {
            let device = Rc::clone(&device);
            ledger.defer("descriptor set layout", move || unsafe {
                device.destroy_descriptor_set_layout(set_layout, None)
            });
        }

        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(STORAGE_BINDINGS)];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(1);
        let descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .vk_op("create_descriptor_pool")?;
        {
            let device = Rc::clone(&device);
            ledger.defer("descriptor pool", move || unsafe {
                device.destroy_descriptor_pool(descriptor_pool, None)
            });
        }

        let set_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool)
            .set_layouts(std::slice::from_ref(&set_layout));
        let descriptor_set = unsafe { device.allocate_descriptor_sets(&set_info) }
            .vk_op("allocate_descriptor_sets")?[0];

        // Command pool + single primary buffer
        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = unsafe { device.create_command_pool(&command_pool_info, None) }
            .vk_op("create_command_pool")?;
        {
            let device = Rc::clone(&device);
            ledger.defer("command pool", move || unsafe {
                device.destroy_command_pool(command_pool, None)
            });
        }

        let buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&buffer_info) }
            .vk_op("allocate_command_buffers")?[0];

        // Fence, created unsignalled
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .vk_op("create_fence")?;
        {
            let device = Rc::clone(&device);
            ledger.defer("fence", move || unsafe { device.destroy_fence(fence, None) });
        }

        // Timestamp queries, host-reset so the first read is well-defined
        let query_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(QUERY_COUNT);
        let query_pool = unsafe { device.create_query_pool(&query_info, None) }
            .vk_op("create_query_pool")?;
        {
            let device = Rc::clone(&device);
            ledger.defer("query pool", move || unsafe {
                device.destroy_query_pool(query_pool, None)
            });
        }
        unsafe { device.reset_query_pool(query_pool, 0, QUERY_COUNT) };

        tracing::debug!("Device context ready ({} global objects)", ledger.len());

        Ok(Self {
            info: choice.info,
            device,
            queue,
            allocator,
            descriptor_set,
            set_layout,
            command_pool,
            command_buffer,
            fence,
            query_pool,
            ledger: std::mem::replace(ledger, ResourceLedger::new("global")),
        })
    }

    /// Wait for the device to go idle, then destroy every global object.
    pub fn shutdown(mut self) -> Result<(), BenchError> {
        unsafe { self.device.device_wait_idle() }.vk_op("device_wait_idle")?;
        tracing::info!("Shutting down ({} global objects)", self.ledger.len());
        self.ledger.release_all();
        Ok(())
    }
}

impl ComputeContext for VulkanContext {
    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    fn storage_binding_count(&self) -> usize {
        STORAGE_BINDINGS as usize
    }

    fn begin_recording(&mut self) -> Result<(), BenchError> {
        let info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(self.command_buffer, &info) }.vk_op("begin_command_buffer")
    }

    fn write_timestamp(&mut self, stage: vk::PipelineStageFlags, slot: QuerySlot) {
        unsafe {
            self.device
                .cmd_write_timestamp(self.command_buffer, stage, self.query_pool, slot.index())
        };
    }

    fn record(&mut self, command: &Command) {
        let cmd = self.command_buffer;
        let device = &self.device;
        unsafe {
            match *command {
                Command::BindPipeline { pipeline } => {
                    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline)
                }
                Command::BindDescriptorSet { layout, set } => device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    layout,
                    0,
                    &[set],
                    &[],
                ),
                Command::Dispatch(grid) => device.cmd_dispatch(cmd, grid.x, grid.y, grid.z),
                Command::FillBuffer { buffer, size, data } => device.cmd_fill_buffer(cmd, buffer, 0, size, data),
                Command::CopyBuffer { src, dst, size } => {
                    let region = vk::BufferCopy::default().size(size);
                    device.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region))
                }
                Command::Barrier {
                    src_stage,
                    dst_stage,
                    src_access,
                    dst_access,
                } => {
                    let barrier = vk::MemoryBarrier::default()
                        .src_access_mask(src_access)
                        .dst_access_mask(dst_access);
                    device.cmd_pipeline_barrier(
                        cmd,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        std::slice::from_ref(&barrier),
                        &[],
                        &[],
                    )
                }
            }
        }
    }

    fn end_recording(&mut self) -> Result<(), BenchError> {
        unsafe { self.device.end_command_buffer(self.command_buffer) }.vk_op("end_command_buffer")
    }

    fn submit(&mut self) -> Result<(), BenchError> {
        let submit = vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&self.command_buffer));
        unsafe {
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&submit), self.fence)
        }
        .vk_op("queue_submit")
    }

    fn wait_for_fence(&mut self, timeout: Duration) -> Result<(), BenchError> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(&[self.fence], true, nanos) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(BenchError::FenceTimeout { timeout }),
            Err(code) => Err(BenchError::Device {
                op: "wait_for_fences",
                code,
            }),
        }
    }

    fn reset_fence(&mut self) -> Result<(), BenchError> {
        unsafe { self.device.reset_fences(&[self.fence]) }.vk_op("reset_fences")
    }

    fn reset_command_pool(&mut self) -> Result<(), BenchError> {
        unsafe {
            self.device
                .reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())
        }
        .vk_op("reset_command_pool")
    }

    fn read_timestamps(&mut self) -> Result<[u64; 2], BenchError> {
        let mut ticks = [0u64; QUERY_COUNT as usize];
        unsafe {
            self.device.get_query_pool_results(
                self.query_pool,
                QuerySlot::Start.index(),
                &mut ticks[..],
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
        }
        .vk_op("get_query_pool_results")?;
        Ok(ticks)
    }

    fn reset_queries(&mut self) {
        unsafe { self.device.reset_query_pool(self.query_pool, 0, QUERY_COUNT) };
    }

    fn wait_idle(&mut self) -> Result<(), BenchError> {
        unsafe { self.device.device_wait_idle() }.vk_op("device_wait_idle")
    }

    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn create_buffer(&mut self, request: &BufferRequest) -> Result<BufferHandle, BenchError> {
        self.allocator.create_buffer(request)
    }

    fn buffer_release(&self, buffer: &BufferHandle) -> ReleaseFn {
        self.allocator.release(buffer)
    }

    fn read_buffer(&mut self, buffer: &BufferHandle, dst: &mut [u8]) -> Result<(), BenchError> {
        self.allocator.read(buffer, dst)
    }

    fn update_descriptors(&mut self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .map(|w| {
                vk::DescriptorBufferInfo::default()
                    .buffer(w.buffer)
                    .offset(0)
                    .range(w.range)
            })
            .collect();
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .zip(&infos)
            .map(|(w, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(w.binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    fn create_pipeline(&mut self, shader: &ShaderCode, workgroup_size_x: u32) -> Result<PipelineHandle, BenchError> {
        pipeline::create_compute_pipeline(&self.device, self.set_layout, shader, workgroup_size_x)
    }

    fn pipeline_release(&self, pipeline: &PipelineHandle) -> ReleaseFn {
        pipeline::pipeline_release(&self.device, pipeline)
    }
}
