//! # vkstride Core
//!
//! Measures compute-shader dispatch time under different input buffer
//! layouts (packed vec3, padded vec3, vec4) using device timestamp queries.
//!
//! Flow per test:
//! executor -> buffer provisioning -> timed submission (N times)
//! -> statistics -> report -> per-test ledger teardown -> next test.

// ============================================================================
// Device seam / Vulkan
// ============================================================================
pub mod context;
pub mod vulkan;

// ============================================================================
// Core engine
// ============================================================================
pub mod buffers;
pub mod commands;
pub mod executor;
pub mod ledger;
pub mod shader;
pub mod stats;
pub mod timing;

// ============================================================================
// Ambient
// ============================================================================
pub mod config;
pub mod error;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

pub use config::BenchConfig;
pub use context::ComputeContext;
pub use error::BenchError;
pub use executor::{TestDescriptor, TestExecutor};
pub use ledger::ResourceLedger;
pub use report::{BenchSuite, TestReport};
pub use stats::TestRunStatistics;
pub use vulkan::VulkanContext;

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
