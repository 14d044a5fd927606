//! Error taxonomy for the harness.
//!
//! Every variant is fatal to the benchmark run: the runner logs the error and
//! aborts instead of reporting timings taken on a device in a suspect state.

use ash::prelude::VkResult;
use ash::vk;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Vulkan loader unavailable: {0}")]
    Loader(String),
    #[error("No physical device with a timestamp-capable compute queue")]
    NoComputeDevice,
    #[error("Queue family {family} does not support timestamp queries")]
    TimestampsUnsupported { family: u32 },
    #[error("Vulkan error in {op}: {code:?}")]
    Device { op: &'static str, code: vk::Result },
    #[error("Out of device memory allocating {size} bytes ({code:?})")]
    OutOfDeviceMemory { size: u64, code: vk::Result },
    #[error("No memory type matches bits {type_bits:#x} with {required:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },
    #[error("Fence wait exceeded {timeout:?} - device hung or shader stalled")]
    FenceTimeout { timeout: Duration },
    #[error("Timestamp end {end} precedes start {start}")]
    TimestampOrder { start: u64, end: u64 },
    #[error("Failed to open shader {path}: {source}")]
    ShaderOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Shader {path} is {size} bytes, not a multiple of the 4-byte SPIR-V word")]
    ShaderMisaligned { path: PathBuf, size: u64 },
    #[error("Shader {path} is not a SPIR-V module: {reason}")]
    ShaderInvalid { path: PathBuf, reason: String },
    #[error("Descriptor layout has {expected} storage bindings, got {actual} buffers")]
    BindingCount { expected: usize, actual: usize },
    #[error("Buffer is not host-visible and cannot be read back")]
    NotHostVisible,
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BenchError {
    /// Raw Vulkan result code, when the failure came from a device call.
    pub fn vk_code(&self) -> Option<vk::Result> {
        match self {
            BenchError::Device { code, .. } | BenchError::OutOfDeviceMemory { code, .. } => {
                Some(*code)
            }
            BenchError::FenceTimeout { .. } => Some(vk::Result::TIMEOUT),
            _ => None,
        }
    }
}

/// Tags a raw `VkResult` with the operation that produced it.
pub trait VkResultExt<T> {
    fn vk_op(self, op: &'static str) -> Result<T, BenchError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn vk_op(self, op: &'static str) -> Result<T, BenchError> {
        self.map_err(|code| BenchError::Device { op, code })
    }
}
