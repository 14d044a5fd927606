//! Explicit command lists recorded between the two timestamps.
//!
//! The executor builds a `CommandList` value and hands it to the timed
//! submission protocol, which records it verbatim. Nothing is captured by
//! reference across the fence wait.

use ash::vk;
use serde::{Deserialize, Serialize};

/// Workgroup grid for one `vkCmdDispatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchGrid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchGrid {
    /// One-dimensional grid covering `element_count` invocations.
    ///
    /// `workgroup_size_x` must be non-zero; the config layer rejects zero.
    pub fn for_elements(element_count: u32, workgroup_size_x: u32) -> Self {
        Self {
            x: element_count.div_ceil(workgroup_size_x),
            y: 1,
            z: 1,
        }
    }

    pub fn invocations(&self, workgroup_size_x: u32) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64 * workgroup_size_x as u64
    }
}

impl std::fmt::Display for DispatchGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    BindPipeline {
        pipeline: vk::Pipeline,
    },
    BindDescriptorSet {
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    },
    Dispatch(DispatchGrid),
    /// Fill `size` bytes from offset 0 with a repeated 32-bit word.
    FillBuffer {
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        data: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    Barrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    },
}

/// Ordered commands plus the stage whose completion closes the measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandList {
    commands: Vec<Command>,
    measured_stage: vk::PipelineStageFlags,
}

impl CommandList {
    /// List measured up to compute-shader completion.
    pub fn compute() -> Self {
        Self::with_stage(vk::PipelineStageFlags::COMPUTE_SHADER)
    }

    /// List measured up to transfer completion (fills, copies).
    pub fn transfer() -> Self {
        Self::with_stage(vk::PipelineStageFlags::TRANSFER)
    }

    pub fn with_stage(measured_stage: vk::PipelineStageFlags) -> Self {
        Self {
            commands: Vec::new(),
            measured_stage,
        }
    }

    pub fn push(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn bind_compute(self, pipeline: vk::Pipeline, layout: vk::PipelineLayout, set: vk::DescriptorSet) -> Self {
        self.push(Command::BindPipeline { pipeline })
            .push(Command::BindDescriptorSet { layout, set })
    }

    pub fn dispatch(self, grid: DispatchGrid) -> Self {
        self.push(Command::Dispatch(grid))
    }

    pub fn fill(self, buffer: vk::Buffer, size: vk::DeviceSize, data: u32) -> Self {
        self.push(Command::FillBuffer { buffer, size, data })
    }

    pub fn copy(self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> Self {
        self.push(Command::CopyBuffer { src, dst, size })
    }

    /// Make earlier shader writes visible to transfer reads.
    pub fn compute_to_transfer_barrier(self) -> Self {
        self.push(Command::Barrier {
            src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            src_access: vk::AccessFlags::SHADER_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_READ,
        })
    }

    /// Make transfer writes visible to host reads after the fence.
    pub fn transfer_to_host_barrier(self) -> Self {
        self.push(Command::Barrier {
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::HOST,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::HOST_READ,
        })
    }

    /// Make transfer writes visible to compute-shader reads.
    pub fn transfer_to_compute_barrier(self) -> Self {
        self.push(Command::Barrier {
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        })
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn measured_stage(&self) -> vk::PipelineStageFlags {
        self.measured_stage
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_dispatch_grid_rounds_up() {
        assert_eq!(
            DispatchGrid::for_elements(1024, 64),
            DispatchGrid { x: 16, y: 1, z: 1 }
        );
        assert_eq!(DispatchGrid::for_elements(1025, 64).x, 17);
        assert_eq!(DispatchGrid::for_elements(1, 256).x, 1);
        assert_eq!(DispatchGrid::for_elements(0, 64).x, 0);
    }

    #[test]
    fn test_grid_covers_all_elements() {
        for (count, wg) in [(1000u32, 64u32), (4096, 256), (7, 3), (1 << 20, 128)] {
            let grid = DispatchGrid::for_elements(count, wg);
            assert!(grid.invocations(wg) >= count as u64);
            assert!(grid.invocations(wg) < count as u64 + wg as u64);
        }
    }

    #[test]
    fn test_builder_keeps_order_and_stage() {
        let list = CommandList::compute()
            .bind_compute(
                vk::Pipeline::from_raw(1),
                vk::PipelineLayout::from_raw(2),
                vk::DescriptorSet::from_raw(3),
            )
            .dispatch(DispatchGrid::for_elements(1024, 64));

        assert_eq!(list.measured_stage(), vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(list.len(), 3);
        assert!(matches!(list.commands()[0], Command::BindPipeline { .. }));
        assert!(matches!(list.commands()[1], Command::BindDescriptorSet { .. }));
        assert!(matches!(list.commands()[2], Command::Dispatch(DispatchGrid { x: 16, .. })));
    }

    #[test]
    fn test_transfer_list_measures_transfer_stage() {
        let list = CommandList::transfer()
            .fill(vk::Buffer::from_raw(9), 64, 1.0f32.to_bits())
            .transfer_to_compute_barrier();
        assert_eq!(list.measured_stage(), vk::PipelineStageFlags::TRANSFER);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_copy_back_list_is_fenced_on_both_sides() {
        let (src, dst) = (vk::Buffer::from_raw(4), vk::Buffer::from_raw(5));
        let list = CommandList::transfer()
            .compute_to_transfer_barrier()
            .copy(src, dst, 16)
            .transfer_to_host_barrier();

        assert_eq!(list.measured_stage(), vk::PipelineStageFlags::TRANSFER);
        assert_eq!(list.commands()[1], Command::CopyBuffer { src, dst, size: 16 });
        assert!(matches!(
            list.commands()[0],
            Command::Barrier { dst_access: vk::AccessFlags::TRANSFER_READ, .. }
        ));
        assert!(matches!(
            list.commands()[2],
            Command::Barrier { dst_stage: vk::PipelineStageFlags::HOST, .. }
        ));
    }
}
