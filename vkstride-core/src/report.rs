//! # Reports
//!
//! Per-test text report, suite summary table and JSON export.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::commands::DispatchGrid;
use crate::config::BenchConfig;
use crate::context::{ComputeContext, DeviceInfo};
use crate::error::BenchError;
use crate::executor::{RunPlan, TestDescriptor, TestExecutor};
use crate::stats::TestRunStatistics;

/// Outcome of one layout test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub name: String,
    pub descriptor: TestDescriptor,
    pub element_count: u32,
    pub buffer_size: u64,
    pub workgroup_size_x: u32,
    pub grid: DispatchGrid,
    pub stats: TestRunStatistics,
}

impl TestReport {
    pub fn new(descriptor: &TestDescriptor, plan: &RunPlan, stats: TestRunStatistics) -> Self {
        Self {
            name: descriptor.name(),
            descriptor: descriptor.clone(),
            element_count: plan.element_count,
            buffer_size: descriptor.buffer_size(plan.element_count),
            workgroup_size_x: plan.workgroup_size_x,
            grid: plan.grid(),
            stats,
        }
    }

    /// Human-readable report
    pub fn report(&self) -> String {
        let st = &self.stats;
        let mut s = String::new();

        s.push_str("═══════════════════════════════════════════════════════════\n");
        s.push_str(&format!("  Layout Test: {}\n", self.name));
        s.push_str("═══════════════════════════════════════════════════════════\n\n");

        s.push_str(&format!("  Shader:      {}\n", self.descriptor.shader.display()));
        s.push_str(&format!("  Alignment:   {} scalars/element\n", self.descriptor.element_alignment));
        s.push_str(&format!("  Elements:    {}\n", self.element_count));
        s.push_str(&format!("  Buffer size: {} bytes x 3\n", self.buffer_size));
        s.push_str(&format!(
            "  Dispatch:    {} (local_size_x {}, {} invocations)\n\n",
            self.grid,
            self.workgroup_size_x,
            self.grid.invocations(self.workgroup_size_x)
        ));

        s.push_str("  Results:\n");
        s.push_str("  ─────────────────────────────────────────────────────────\n");
        s.push_str(&format!("  Iterations:         {:>12}\n", st.iteration_count));
        s.push_str(&format!("  Total:              {:>12.4} ms\n", st.total_ms));
        s.push_str(&format!("  Mean:               {:>12.4} ms\n", st.mean_ms));
        s.push_str(&format!("  Median:             {:>12.4} ms\n", st.median_ms));
        s.push_str(&format!("  Min:                {:>12.4} ms\n", st.min_ms));
        s.push_str(&format!("  Max:                {:>12.4} ms\n", st.max_ms));
        s.push_str(&format!("  Variance:           {:>12} ms²\n", fmt_opt(st.sample_variance_ms2, 6)));
        s.push_str(&format!("  Std deviation:      {:>12} ms\n", fmt_opt(st.std_dev_ms, 4)));
        s.push_str(&format!(
            "  CV:                 {:>12} %\n",
            fmt_opt(st.relative_std_dev().map(|cv| cv * 100.0), 2)
        ));
        s.push_str("  ─────────────────────────────────────────────────────────\n");

        s
    }
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "n/a".to_string(),
    }
}

/// All tests of one run, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchSuite {
    pub device: DeviceInfo,
    pub timestamp: DateTime<Utc>,
    pub results: Vec<TestReport>,
}

impl BenchSuite {
    pub fn new(device: DeviceInfo) -> Self {
        Self {
            device,
            timestamp: Utc::now(),
            results: Vec::new(),
        }
    }

    /// Run every configured test sequentially.
    ///
    /// `on_report` sees each report as soon as its test has been torn down.
    /// The first error stops the suite.
    pub fn run<C, F>(ctx: &mut C, config: &BenchConfig, mut on_report: F) -> Result<Self, BenchError>
    where
        C: ComputeContext + ?Sized,
        F: FnMut(&TestReport),
    {
        let plan = RunPlan::from(config);
        let executor = TestExecutor::new(plan);
        let mut suite = Self::new(ctx.device_info().clone());

        tracing::info!(
            "Suite: {} test(s) on {} (timestamp period {} ns)",
            config.tests.len(),
            suite.device.name,
            suite.device.timestamp_period_ns
        );

        for descriptor in &config.tests {
            let stats = executor.run_test(ctx, descriptor)?;
            let report = TestReport::new(descriptor, executor.plan(), stats);
            on_report(&report);
            suite.results.push(report);
        }

        Ok(suite)
    }

    pub fn results(&self) -> &[TestReport] {
        &self.results
    }

    /// Fastest test by mean dispatch time.
    pub fn fastest(&self) -> Option<&TestReport> {
        self.results
            .iter()
            .filter(|r| r.stats.iteration_count > 0)
            .min_by(|a, b| a.stats.mean_ms.total_cmp(&b.stats.mean_ms))
    }

    /// Generate full suite report
    pub fn report(&self) -> String {
        let mut s = String::new();

        s.push('\n');
        s.push_str("╔═══════════════════════════════════════════════════════════╗\n");
        s.push_str("║          vkstride Buffer Layout Suite                     ║\n");
        s.push_str("╚═══════════════════════════════════════════════════════════╝\n\n");

        s.push_str(&format!("  Device: {} (Vulkan {})\n", self.device.name, self.device.api_version));
        s.push_str(&format!(
            "  Timestamp period: {} ns, {} valid bits\n",
            self.device.timestamp_period_ns, self.device.timestamp_valid_bits
        ));
        s.push_str(&format!("  Time:   {}\n\n", self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")));

        s.push_str("  Summary:\n");
        s.push_str("  ─────────────────────────────────────────────────────────────\n");
        s.push_str(&format!(
            "  {:16} {:>5} {:>12} {:>12} {:>14}\n",
            "Layout", "Align", "Mean (ms)", "Median (ms)", "Var (ms²)"
        ));
        s.push_str("  ─────────────────────────────────────────────────────────────\n");

        for r in &self.results {
            s.push_str(&format!(
                "  {:16} {:>5} {:>12.4} {:>12.4} {:>14}\n",
                r.name,
                r.descriptor.element_alignment,
                r.stats.mean_ms,
                r.stats.median_ms,
                fmt_opt(r.stats.sample_variance_ms2, 6)
            ));
        }

        if let Some(best) = self.fastest() {
            s.push_str(&format!("\n  Fastest: {} ({:.4} ms mean)\n", best.name, best.stats.mean_ms));
        }

        s
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockContext;
    use std::io::Write;
    use std::time::Duration;

    fn plan() -> RunPlan {
        RunPlan {
            element_count: 1024,
            workgroup_size_x: 64,
            iterations: 5,
            inter_iteration_delay: Duration::ZERO,
            inter_test_delay: Duration::ZERO,
            peek_output: false,
        }
    }

    fn sample_report(name: &str, alignment: u32, samples: Vec<f64>) -> TestReport {
        let descriptor = TestDescriptor::new(format!("shaders/{}.comp.spv", name), alignment);
        TestReport::new(&descriptor, &plan(), TestRunStatistics::from_samples(samples))
    }

    #[test]
    fn test_report_contents() {
        let report = sample_report("packed_vec3", 3, vec![1.0, 1.2, 0.9, 1.1, 1.0]);
        assert_eq!(report.buffer_size, 1024 * 12);
        assert_eq!(report.grid, DispatchGrid { x: 16, y: 1, z: 1 });

        let text = report.report();
        assert!(text.contains("packed_vec3"));
        assert!(text.contains("16x1x1 (local_size_x 64, 1024 invocations)"));
        assert!(text.contains("1.0400"));
        assert!(text.contains("0.013000"));
        assert!(text.contains("10.96 %"));
    }

    #[test]
    fn test_single_iteration_shows_not_applicable() {
        let text = sample_report("aligned_vec4", 4, vec![0.5]).report();
        assert_eq!(text.matches("n/a").count(), 3);
    }

    #[test]
    fn test_suite_summary_and_fastest() {
        let mut suite = BenchSuite::new(MockContext::new().device_info().clone());
        suite.results.push(sample_report("packed_vec3", 3, vec![1.4, 1.6]));
        suite.results.push(sample_report("aligned_vec4", 4, vec![0.9, 1.1]));

        assert_eq!(suite.fastest().map(|r| r.name.as_str()), Some("aligned_vec4"));
        let text = suite.report();
        assert!(text.contains("Mock Device"));
        assert!(text.contains("Fastest: aligned_vec4"));
    }

    #[test]
    fn test_suite_json_shape() {
        let mut suite = BenchSuite::new(MockContext::new().device_info().clone());
        suite.results.push(sample_report("padded_vec3", 4, vec![2.0]));

        let value: serde_json::Value = serde_json::from_str(&suite.to_json()).unwrap();
        assert_eq!(value["device"]["name"], "Mock Device");
        assert_eq!(value["results"][0]["name"], "padded_vec3");
        assert_eq!(value["results"][0]["descriptor"]["element_alignment"], 4);
        assert!(value["results"][0]["stats"]["sample_variance_ms2"].is_null());
    }

    #[test]
    fn test_run_executes_tests_in_order() {
        let mut file = tempfile::Builder::new()
            .prefix("layout_test")
            .suffix(".comp.spv")
            .tempfile()
            .unwrap();
        for w in [0x0723_0203u32, 0x0001_0300, 0, 8, 0] {
            file.write_all(&w.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();

        let config = BenchConfig {
            element_count: 256,
            iterations: 3,
            inter_iteration_delay_ms: 0,
            inter_test_delay_ms: 0,
            tests: vec![
                TestDescriptor::new(file.path(), 3),
                TestDescriptor::new(file.path(), 4),
            ],
            ..Default::default()
        };
        // 25 ticks at 40 ns = 1 us per sample.
        let mut ctx = MockContext::new()
            .with_timestamp_period(40.0)
            .with_ticks(&[(0, 25); 8]);

        let mut seen = Vec::new();
        let suite = BenchSuite::run(&mut ctx, &config, |r| seen.push(r.buffer_size)).unwrap();

        assert_eq!(seen, vec![256 * 12, 256 * 16]);
        assert_eq!(suite.results().len(), 2);
        for r in suite.results() {
            assert_eq!(r.stats.iteration_count, 3);
            assert!((r.stats.mean_ms - 0.001).abs() < 1e-12);
            assert_eq!(r.grid, DispatchGrid { x: 4, y: 1, z: 1 });
        }
    }
}
