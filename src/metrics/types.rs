use serde::{Deserialize, Serialize};

/// One reading of this process's CPU and resident memory.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageSample {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

/// Resource usage over a run, as stored on its completion row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub sample_count: u64,
    pub avg_cpu_percent: Option<f64>,
    pub max_cpu_percent: Option<f64>,
    pub avg_memory_mb: Option<f64>,
    pub max_memory_mb: Option<f64>,
}

impl ResourceUsage {
    pub fn from_samples(samples: &[UsageSample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let count = samples.len() as f64;
        let cpu_sum: f64 = samples.iter().map(|s| f64::from(s.cpu_percent)).sum();
        let mem_sum: f64 = samples.iter().map(|s| s.memory_mb).sum();
        let cpu_max = samples
            .iter()
            .map(|s| f64::from(s.cpu_percent))
            .fold(f64::MIN, f64::max);
        let mem_max = samples.iter().map(|s| s.memory_mb).fold(f64::MIN, f64::max);

        Self {
            sample_count: samples.len() as u64,
            avg_cpu_percent: Some(cpu_sum / count),
            max_cpu_percent: Some(cpu_max),
            avg_memory_mb: Some(mem_sum / count),
            max_memory_mb: Some(mem_max),
        }
    }
}
