//! # Timed Submission Protocol
//!
//! Records a command list between two timestamp writes on the single reusable
//! command buffer, submits it, blocks on the fence, and returns the device
//! tick delta. Exactly one submission is ever in flight.
//!
//! Sequence per call:
//! 1. begin one-shot recording (buffer must be in its reset state)
//! 2. timestamp 0 at TOP_OF_PIPE
//! 3. the caller's commands
//! 4. timestamp 1 after the list's measured stage (COMPUTE_SHADER for
//!    dispatches) has retired
//! 5. end recording, submit with the fence
//! 6. wait on the fence; hitting `FENCE_TIMEOUT` is fatal
//! 7. reset fence, then command pool
//! 8. read both timestamps (WAIT), then host-reset the two query slots
//!
//! Results are read before the slots are reset: a reset slot is unavailable
//! and a WAIT read on it would never return.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use ash::vk;

use crate::commands::CommandList;
use crate::context::{ComputeContext, QuerySlot};
use crate::error::BenchError;

/// Upper bound on one measured submission before the device counts as hung.
pub const FENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Elapsed device ticks between the two timestamp writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TickDelta(pub u64);

impl TickDelta {
    /// `end - start` modulo the valid timestamp bits.
    ///
    /// A counter narrower than 64 bits may wrap between the two writes, so the
    /// masked difference is taken modulo `mask + 1`. A full 64-bit counter
    /// cannot wrap within a dispatch; `end < start` there is an ordering error.
    pub fn between(start: u64, end: u64, mask: u64) -> Result<Self, BenchError> {
        let (start, end) = (start & mask, end & mask);
        if mask == u64::MAX && end < start {
            return Err(BenchError::TimestampOrder { start, end });
        }
        Ok(TickDelta(end.wrapping_sub(start) & mask))
    }

    pub fn ticks(self) -> u64 {
        self.0
    }
}

/// One elapsed-time measurement.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TimingSample {
    pub nanos: f64,
}

impl TimingSample {
    pub fn from_ticks(delta: TickDelta, timestamp_period_ns: f32) -> Self {
        Self {
            nanos: delta.0 as f64 * timestamp_period_ns as f64,
        }
    }

    pub fn millis(&self) -> f64 {
        self.nanos / 1e6
    }
}

/// Run `commands` bracketed by timestamps and return the tick delta.
pub fn submit_timed<C: ComputeContext + ?Sized>(
    ctx: &mut C,
    commands: &CommandList,
) -> Result<TickDelta, BenchError> {
    ctx.begin_recording()?;
    ctx.write_timestamp(vk::PipelineStageFlags::TOP_OF_PIPE, QuerySlot::Start);
    for command in commands.commands() {
        ctx.record(command);
    }
    ctx.write_timestamp(commands.measured_stage(), QuerySlot::End);
    ctx.end_recording()?;

    ctx.submit()?;
    ctx.wait_for_fence(FENCE_TIMEOUT)?;

    ctx.reset_fence()?;
    ctx.reset_command_pool()?;
    let [start, end] = ctx.read_timestamps()?;
    ctx.reset_queries();

    let delta = TickDelta::between(start, end, ctx.device_info().timestamp_mask())?;
    tracing::trace!(
        "timed submission: {} command(s), {} ticks",
        commands.len(),
        delta.0
    );
    Ok(delta)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Command, DispatchGrid};
    use crate::testing::{Call, MockContext};
    use ash::vk::Handle;

    fn dispatch_list() -> CommandList {
        CommandList::compute()
            .bind_compute(
                vk::Pipeline::from_raw(11),
                vk::PipelineLayout::from_raw(12),
                vk::DescriptorSet::from_raw(13),
            )
            .dispatch(DispatchGrid::for_elements(1024, 64))
    }

    #[test]
    fn test_protocol_call_order() {
        let mut ctx = MockContext::new().with_ticks(&[(1_000, 1_750)]);
        let list = dispatch_list();

        let delta = submit_timed(&mut ctx, &list).unwrap();
        assert_eq!(delta, TickDelta(750));

        let mut expected = vec![
            Call::BeginRecording,
            Call::WriteTimestamp(vk::PipelineStageFlags::TOP_OF_PIPE, QuerySlot::Start),
        ];
        expected.extend(list.commands().iter().copied().map(Call::Record));
        expected.extend([
            Call::WriteTimestamp(vk::PipelineStageFlags::COMPUTE_SHADER, QuerySlot::End),
            Call::EndRecording,
            Call::Submit,
            Call::WaitForFence(FENCE_TIMEOUT),
            Call::ResetFence,
            Call::ResetCommandPool,
            Call::ReadTimestamps,
            Call::ResetQueries,
        ]);
        assert_eq!(ctx.calls(), expected);
    }

    #[test]
    fn test_timestamps_bracket_only_the_list() {
        let mut ctx = MockContext::new().with_ticks(&[(0, 10)]);
        submit_timed(&mut ctx, &dispatch_list()).unwrap();

        let calls = ctx.calls();
        let start = calls
            .iter()
            .position(|c| matches!(c, Call::WriteTimestamp(_, QuerySlot::Start)))
            .unwrap();
        let end = calls
            .iter()
            .position(|c| matches!(c, Call::WriteTimestamp(_, QuerySlot::End)))
            .unwrap();
        let records: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Call::Record(_)))
            .map(|(i, _)| i)
            .collect();

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|&i| i > start && i < end));
    }

    #[test]
    fn test_empty_list_yields_non_negative_delta() {
        let mut ctx = MockContext::new().with_ticks(&[(5_000, 5_000), (5_000, 5_012)]);
        let empty = CommandList::compute();

        assert_eq!(submit_timed(&mut ctx, &empty).unwrap(), TickDelta(0));
        assert_eq!(submit_timed(&mut ctx, &empty).unwrap(), TickDelta(12));
        assert!(!ctx.calls().iter().any(|c| matches!(c, Call::Record(_))));
    }

    #[test]
    fn test_fence_timeout_is_fatal_and_skips_readback() {
        let mut ctx = MockContext::new().with_fence_timeout();
        let err = submit_timed(&mut ctx, &dispatch_list()).unwrap_err();

        assert!(matches!(err, BenchError::FenceTimeout { timeout } if timeout == FENCE_TIMEOUT));
        let calls = ctx.calls();
        assert_eq!(calls.last(), Some(&Call::WaitForFence(FENCE_TIMEOUT)));
        assert!(!calls.contains(&Call::ReadTimestamps));
    }

    #[test]
    fn test_end_before_start_is_rejected() {
        let mut ctx = MockContext::new().with_ticks(&[(900, 100)]);
        let err = submit_timed(&mut ctx, &dispatch_list()).unwrap_err();
        assert!(matches!(err, BenchError::TimestampOrder { start: 900, end: 100 }));
    }

    #[test]
    fn test_transfer_list_closes_on_transfer_stage() {
        let mut ctx = MockContext::new().with_ticks(&[(0, 1)]);
        let list = CommandList::transfer().push(Command::FillBuffer {
            buffer: vk::Buffer::from_raw(1),
            size: 16,
            data: 0,
        });
        submit_timed(&mut ctx, &list).unwrap();
        assert!(ctx.calls().contains(&Call::WriteTimestamp(
            vk::PipelineStageFlags::TRANSFER,
            QuerySlot::End
        )));
    }

    #[test]
    fn test_consecutive_submissions_reuse_reset_state() {
        let mut ctx = MockContext::new().with_ticks(&[(0, 5), (10, 30), (40, 41)]);
        let list = dispatch_list();
        let deltas: Vec<u64> = (0..3)
            .map(|_| submit_timed(&mut ctx, &list).unwrap().ticks())
            .collect();
        assert_eq!(deltas, vec![5, 20, 1]);

        let begins = ctx.calls().iter().filter(|c| **c == Call::BeginRecording).count();
        let resets = ctx.calls().iter().filter(|c| **c == Call::ResetCommandPool).count();
        assert_eq!((begins, resets), (3, 3));
    }

    #[test]
    fn test_tick_delta_masks_valid_bits() {
        let mask = (1u64 << 36) - 1;
        let high = 0xFFFF_0000_0000_0000u64;
        assert_eq!(TickDelta::between(high | 100, high | 250, mask).unwrap(), TickDelta(150));
    }

    #[test]
    fn test_tick_delta_survives_counter_wrap() {
        let mask = (1u64 << 36) - 1;
        assert_eq!(TickDelta::between(mask - 10, 5, mask).unwrap(), TickDelta(16));
        assert_eq!(TickDelta::between(mask, 0, mask).unwrap(), TickDelta(1));

        let mut ctx = MockContext::new()
            .with_timestamp_bits(36)
            .with_ticks(&[(mask - 99, 100)]);
        assert_eq!(submit_timed(&mut ctx, &dispatch_list()).unwrap(), TickDelta(200));
    }

    #[test]
    fn test_sample_conversion() {
        let sample = TimingSample::from_ticks(TickDelta(1_000_000), 1.0);
        assert!((sample.millis() - 1.0).abs() < 1e-12);

        let sample = TimingSample::from_ticks(TickDelta(25_000), 40.0);
        assert!((sample.millis() - 1.0).abs() < 1e-9);
    }
}
