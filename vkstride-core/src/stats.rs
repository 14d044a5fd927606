//! # Statistics Aggregator
//!
//! Summarizes the ordered per-iteration samples of one test run.
//!
//! - total = sum of samples
//! - mean = total / N
//! - sample variance = sum((x - mean)^2) / (N - 1), only for N >= 2

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestRunStatistics {
    pub iteration_count: usize,
    /// One entry per iteration, in execution order.
    pub per_iteration_ms: Vec<f64>,
    pub total_ms: f64,
    pub mean_ms: f64,
    /// `None` when fewer than two samples exist.
    pub sample_variance_ms2: Option<f64>,
    pub std_dev_ms: Option<f64>,
    pub min_ms: f64,
    pub max_ms: f64,
    pub median_ms: f64,
}

impl TestRunStatistics {
    pub fn from_samples(samples: Vec<f64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let count = samples.len();
        let total: f64 = samples.iter().sum();
        let mean = total / count as f64;

        let sample_variance = (count >= 2).then(|| {
            samples
                .iter()
                .map(|&s| {
                    let diff = s - mean;
                    diff * diff
                })
                .sum::<f64>()
                / (count - 1) as f64
        });

        let mut sorted = samples.clone();
        sorted.sort_by(f64::total_cmp);
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };

        Self {
            iteration_count: count,
            total_ms: total,
            mean_ms: mean,
            sample_variance_ms2: sample_variance,
            std_dev_ms: sample_variance.map(f64::sqrt),
            min_ms: sorted[0],
            max_ms: sorted[count - 1],
            median_ms: median,
            per_iteration_ms: samples,
        }
    }

    /// Coefficient of variation (std dev / mean), when defined.
    pub fn relative_std_dev(&self) -> Option<f64> {
        match self.std_dev_ms {
            Some(sd) if self.mean_ms > 0.0 => Some(sd / self.mean_ms),
            _ => None,
        }
    }
}
