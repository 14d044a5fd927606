//! Compute pipeline creation with the workgroup size specialized in.

use ash::vk;
use std::rc::Rc;

use crate::context::PipelineHandle;
use crate::error::{BenchError, VkResultExt};
use crate::ledger::ReleaseFn;
use crate::shader::ShaderCode;

/// `layout(local_size_x_id = 0) in;`
pub const WORKGROUP_SIZE_X_CONSTANT_ID: u32 = 0;

const ENTRY_POINT: &std::ffi::CStr = c"main";

/// Specialization map entry for `local_size_x_id = 0`.
pub fn workgroup_map_entry() -> vk::SpecializationMapEntry {
    vk::SpecializationMapEntry::default()
        .constant_id(WORKGROUP_SIZE_X_CONSTANT_ID)
        .offset(0)
        .size(std::mem::size_of::<u32>())
}

pub fn create_compute_pipeline(
    device: &ash::Device,
    set_layout: vk::DescriptorSetLayout,
    shader: &ShaderCode,
    workgroup_size_x: u32,
) -> Result<PipelineHandle, BenchError> {
    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(std::slice::from_ref(&set_layout));
    let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }.vk_op("create_pipeline_layout")?;

    let module_info = vk::ShaderModuleCreateInfo::default().code(shader.words());
    let module = match unsafe { device.create_shader_module(&module_info, None) } {
        Ok(module) => module,
        Err(code) => {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            return Err(BenchError::Device {
                op: "create_shader_module",
                code,
            });
        }
    };

    let map_entry = workgroup_map_entry();
    let spec_data = workgroup_size_x.to_ne_bytes();
    let spec_info = vk::SpecializationInfo::default()
        .map_entries(std::slice::from_ref(&map_entry))
        .data(&spec_data);

    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(ENTRY_POINT)
        .specialization_info(&spec_info);
    let pipeline_info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);

    let created = unsafe { device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) };

    // Module is no longer needed once the pipeline exists (or failed to).
    unsafe { device.destroy_shader_module(module, None) };

    match created {
        Ok(pipelines) => {
            tracing::debug!(
                "Pipeline for {} (local_size_x = {})",
                shader.path().display(),
                workgroup_size_x
            );
            Ok(PipelineHandle {
                pipeline: pipelines[0],
                layout,
            })
        }
        Err((pipelines, code)) => {
            unsafe {
                for p in pipelines.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                    device.destroy_pipeline(p, None);
                }
                device.destroy_pipeline_layout(layout, None);
            }
            Err(BenchError::Device {
                op: "create_compute_pipelines",
                code,
            })
        }
    }
}

pub fn pipeline_release(device: &Rc<ash::Device>, handle: &PipelineHandle) -> ReleaseFn {
    let device = Rc::clone(device);
    let (pipeline, layout) = (handle.pipeline, handle.layout);
    Box::new(move || unsafe {
        device.destroy_pipeline(pipeline, None);
        device.destroy_pipeline_layout(layout, None);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_constant_layout() {
        let entry = workgroup_map_entry();
        assert_eq!(entry.constant_id, 0);
        assert_eq!(entry.offset, 0);
        assert_eq!(entry.size, 4);
    }
}
