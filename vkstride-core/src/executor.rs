//! # Test Executor
//!
//! Runs one layout test end to end: pipeline, three buffers, warm-up fill,
//! N timed dispatches, statistics, then per-test teardown.
//!
//! All per-test objects go into a local ledger. It is drained only after the
//! device is idle, and the inter-test delay follows, so the next test's
//! allocations can never race in-flight use of this test's buffers through
//! the shared descriptor set.

use ash::vk;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::buffers::{self, AllocationFlags, BufferHandle, BufferRequest};
use crate::commands::{CommandList, DispatchGrid};
use crate::config::BenchConfig;
use crate::context::ComputeContext;
use crate::error::BenchError;
use crate::ledger::ResourceLedger;
use crate::shader::load_shader_code;
use crate::stats::TestRunStatistics;
use crate::timing::{submit_timed, TimingSample};

/// Constant written to every scalar of input A before the run.
pub const INPUT_A_FILL: f32 = 1.0;
/// Constant written to every scalar of input B before the run.
pub const INPUT_B_FILL: f32 = 2.0;

/// Bytes copied back for the debug output peek (four scalars).
const OUTPUT_PEEK_BYTES: vk::DeviceSize = 4 * buffers::SCALAR_BYTES;

/// Shader identity plus element alignment, in shader-visible scalars
/// (3 = packed vec3, 4 = vec4 or padded vec3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDescriptor {
    pub shader: PathBuf,
    pub element_alignment: u32,
}

impl TestDescriptor {
    pub fn new(shader: impl Into<PathBuf>, element_alignment: u32) -> Self {
        Self {
            shader: shader.into(),
            element_alignment,
        }
    }

    /// File name with SPIR-V/stage suffixes stripped (`packed_vec3`).
    pub fn name(&self) -> String {
        let file = self
            .shader
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.shader.display().to_string());
        file.split('.').next().unwrap_or(&file).to_string()
    }

    pub fn buffer_size(&self, element_count: u32) -> vk::DeviceSize {
        buffers::buffer_size(element_count, self.element_alignment)
    }
}

/// Run parameters shared by every test of a suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub element_count: u32,
    pub workgroup_size_x: u32,
    pub iterations: u32,
    pub inter_iteration_delay: Duration,
    pub inter_test_delay: Duration,
    /// Copy the head of the output back and log it after the timed loop.
    pub peek_output: bool,
}

impl RunPlan {
    pub fn grid(&self) -> DispatchGrid {
        DispatchGrid::for_elements(self.element_count, self.workgroup_size_x)
    }
}

impl From<&BenchConfig> for RunPlan {
    fn from(config: &BenchConfig) -> Self {
        Self {
            element_count: config.element_count,
            workgroup_size_x: config.workgroup_size_x,
            iterations: config.iterations,
            inter_iteration_delay: config.inter_iteration_delay(),
            inter_test_delay: config.inter_test_delay(),
            peek_output: tracing::enabled!(tracing::Level::DEBUG),
        }
    }
}

pub struct TestExecutor {
    plan: RunPlan,
}

impl TestExecutor {
    pub fn new(plan: RunPlan) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    /// Run `descriptor` to completion and return its statistics.
    ///
    /// Any error leaves the local ledger undrained; its resources are leaked
    /// since the device can no longer be trusted to be done with them.
    pub fn run_test<C: ComputeContext + ?Sized>(
        &self,
        ctx: &mut C,
        descriptor: &TestDescriptor,
    ) -> Result<TestRunStatistics, BenchError> {
        let plan = &self.plan;
        let name = descriptor.name();
        let mut ledger = ResourceLedger::new(format!("test:{}", name));

        tracing::info!(
            "Running {} (alignment {}, {} elements, {} iterations)",
            name,
            descriptor.element_alignment,
            plan.element_count,
            plan.iterations
        );

        // Pipeline
        let code = load_shader_code(&descriptor.shader)?;
        tracing::debug!("{}: {} bytes of SPIR-V", name, code.size_bytes());
        let pipeline = ctx.create_pipeline(&code, plan.workgroup_size_x)?;
        let release = ctx.pipeline_release(&pipeline);
        let pipeline = ledger.acquire("pipeline", pipeline, release);

        // Buffers stay device-local; only the optional staging copy is mappable.
        let size = descriptor.buffer_size(plan.element_count);
        let input_a = buffers::create_buffer(ctx, &mut ledger, "input_a", &BufferRequest::storage(size))?;
        let input_b = buffers::create_buffer(ctx, &mut ledger, "input_b", &BufferRequest::storage(size))?;
        let output = buffers::create_buffer(
            ctx,
            &mut ledger,
            "output",
            &BufferRequest::storage(size).usage(vk::BufferUsageFlags::TRANSFER_SRC),
        )?;
        let staging = if plan.peek_output {
            let request = BufferRequest::storage(OUTPUT_PEEK_BYTES.min(size))
                .allocation(AllocationFlags::HOST_ACCESS_RANDOM);
            Some(buffers::create_buffer(ctx, &mut ledger, "staging", &request)?)
        } else {
            None
        };

        let init = CommandList::transfer()
            .fill(input_a.buffer, size, INPUT_A_FILL.to_bits())
            .fill(input_b.buffer, size, INPUT_B_FILL.to_bits())
            .fill(output.buffer, size, 0)
            .transfer_to_compute_barrier();
        let warmup = submit_timed(ctx, &init)?;
        tracing::debug!("{}: warm-up fill took {} ticks (discarded)", name, warmup.ticks());

        // Binding 0 = input A, 1 = input B, 2 = output.
        let set = ctx.descriptor_set();
        buffers::bind_storage_buffers(ctx, set, &[&input_a, &input_b, &output])?;

        // Timed iterations
        let grid = plan.grid();
        tracing::debug!(
            "{}: grid {} = {} invocations for {} elements",
            name,
            grid,
            grid.invocations(plan.workgroup_size_x),
            plan.element_count
        );
        let dispatch = CommandList::compute()
            .bind_compute(pipeline.pipeline, pipeline.layout, set)
            .dispatch(grid);
        let period_ns = ctx.device_info().timestamp_period_ns;

        let mut samples = Vec::with_capacity(plan.iterations as usize);
        for i in 0..plan.iterations {
            if i > 0 && !plan.inter_iteration_delay.is_zero() {
                ctx.pause(plan.inter_iteration_delay);
            }
            let delta = submit_timed(ctx, &dispatch)?;
            let ms = TimingSample::from_ticks(delta, period_ns).millis();
            tracing::trace!("{} #{}: {} ticks, {:.4} ms", name, i, delta.ticks(), ms);
            samples.push(ms);
        }

        let stats = TestRunStatistics::from_samples(samples);
        match stats.sample_variance_ms2 {
            Some(var) => tracing::info!(
                "{}: grid {}, total {:.3} ms, mean {:.4} ms, variance {:.6} ms^2",
                name,
                grid,
                stats.total_ms,
                stats.mean_ms,
                var
            ),
            None => tracing::info!(
                "{}: grid {}, total {:.3} ms, mean {:.4} ms, variance n/a",
                name,
                grid,
                stats.total_ms,
                stats.mean_ms
            ),
        }

        if let Some(staging) = &staging {
            log_output_head(ctx, &name, &output, staging)?;
        }

        // Teardown
        ctx.wait_idle()?;
        ledger.release_all();
        if !plan.inter_test_delay.is_zero() {
            ctx.pause(plan.inter_test_delay);
        }

        Ok(stats)
    }
}

/// Diagnostic peek at the first output scalars; no validation is done.
///
/// Runs after the timed loop, so the copy never overlaps a measurement.
fn log_output_head<C: ComputeContext + ?Sized>(
    ctx: &mut C,
    name: &str,
    output: &BufferHandle,
    staging: &BufferHandle,
) -> Result<(), BenchError> {
    let copy = CommandList::transfer()
        .compute_to_transfer_barrier()
        .copy(output.buffer, staging.buffer, staging.size)
        .transfer_to_host_barrier();
    submit_timed(ctx, &copy)?;

    let mut head = [0f32; 4];
    let count = head.len().min((staging.size / buffers::SCALAR_BYTES) as usize);
    ctx.read_buffer(staging, bytemuck::cast_slice_mut(&mut head[..count]))?;
    tracing::debug!("{}: output[0..{}] = {:?}", name, count, &head[..count]);
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
