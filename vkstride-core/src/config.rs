//! Benchmark configuration.
//!
//! Defaults carry the hard-coded test sequence; a JSON file and a few command
//! line flags can override them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BenchError;
use crate::executor::TestDescriptor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Elements per buffer (one shader invocation each).
    pub element_count: u32,
    /// Must match the shader's `local_size_x`; passed as specialization
    /// constant 0.
    pub workgroup_size_x: u32,
    pub iterations: u32,
    /// Sleep between consecutive iterations of one test.
    pub inter_iteration_delay_ms: u64,
    /// Sleep after a test's teardown before the next test starts.
    pub inter_test_delay_ms: u64,
    /// Enable VK_LAYER_KHRONOS_validation and route its messages to tracing.
    pub validation: bool,
    /// Print the suite as JSON instead of the text report.
    pub json: bool,
    pub tests: Vec<TestDescriptor>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            element_count: 1 << 20,
            workgroup_size_x: 64,
            iterations: 100,
            inter_iteration_delay_ms: 10,
            inter_test_delay_ms: 500,
            validation: cfg!(debug_assertions),
            json: false,
            tests: default_tests(),
        }
    }
}

/// Packed vec3, std430 vec3 (padded to 16 bytes), and vec4.
pub fn default_tests() -> Vec<TestDescriptor> {
    vec![
        TestDescriptor::new("shaders/packed_vec3.comp.spv", 3),
        TestDescriptor::new("shaders/padded_vec3.comp.spv", 4),
        TestDescriptor::new("shaders/aligned_vec4.comp.spv", 4),
    ]
}

impl BenchConfig {
    /// Load a JSON config file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, BenchError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BenchError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| BenchError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Build from process arguments (program name first).
    ///
    /// `--config <file>` is applied first, then the remaining flags override it.
    pub fn from_args(args: &[String]) -> Result<Self, BenchError> {
        let args = args.get(1..).unwrap_or_default();

        let config_path = args
            .iter()
            .position(|a| a == "--config")
            .map(|i| {
                args.get(i + 1)
                    .map(PathBuf::from)
                    .ok_or_else(|| BenchError::Config("--config needs a path".into()))
            })
            .transpose()?;

        let mut config = match config_path {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    iter.next();
                }
                "--iterations" => config.iterations = parse_value(arg, iter.next())?,
                "--elements" => config.element_count = parse_value(arg, iter.next())?,
                "--workgroup" => config.workgroup_size_x = parse_value(arg, iter.next())?,
                "--delay-ms" => config.inter_iteration_delay_ms = parse_value(arg, iter.next())?,
                "--validation" => config.validation = true,
                "--no-validation" => config.validation = false,
                "--json" => config.json = true,
                other => return Err(BenchError::Config(format!("unknown argument: {}", other))),
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.iterations == 0 {
            return Err(BenchError::Config("iterations must be at least 1".into()));
        }
        if self.element_count == 0 {
            return Err(BenchError::Config("element_count must be at least 1".into()));
        }
        if self.workgroup_size_x == 0 {
            return Err(BenchError::Config("workgroup_size_x must be at least 1".into()));
        }
        if self.tests.is_empty() {
            return Err(BenchError::Config("no tests configured".into()));
        }
        if let Some(t) = self.tests.iter().find(|t| t.element_alignment == 0) {
            return Err(BenchError::Config(format!(
                "{}: element_alignment must be at least 1",
                t.shader.display()
            )));
        }
        Ok(())
    }

    pub fn inter_iteration_delay(&self) -> Duration {
        Duration::from_millis(self.inter_iteration_delay_ms)
    }

    pub fn inter_test_delay(&self) -> Duration {
        Duration::from_millis(self.inter_test_delay_ms)
    }
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T, BenchError>
where
    T::Err: std::fmt::Display,
{
    let value = value.ok_or_else(|| BenchError::Config(format!("{} needs a value", flag)))?;
    value
        .parse()
        .map_err(|e| BenchError::Config(format!("{} {}: {}", flag, value, e)))
}
