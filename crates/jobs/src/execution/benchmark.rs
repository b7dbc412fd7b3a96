use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::result::{max_ms, total_ms};
use super::ExecutionResult;

/// Timing summary of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub mode: String,
    /// Wall time of the whole batch
    pub wall_time_ms: f64,
    /// Sum of per-job elapsed times
    pub total_ms: f64,
    /// Slowest job
    pub max_ms: f64,
    pub jobs: Vec<ExecutionResult>,
}

impl BenchmarkReport {
    /// Time `run` and summarise the results it returns.
    pub fn measure(mode: impl Into<String>, run: impl FnOnce() -> Vec<ExecutionResult>) -> Self {
        let started = Instant::now();
        let jobs = run();
        let wall_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        Self {
            mode: mode.into(),
            wall_time_ms,
            total_ms: total_ms(&jobs),
            max_ms: max_ms(&jobs),
            jobs,
        }
    }

    pub fn failures(&self) -> usize {
        self.jobs.iter().filter(|j| !j.is_success()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summarises_results() {
        let report = BenchmarkReport::measure("sequential", || {
            vec![
                ExecutionResult::success("a", json!(1), 4.0),
                ExecutionResult::failure("b", "nope", 6.0),
            ]
        });
        assert_eq!(report.mode, "sequential");
        assert_eq!(report.total_ms, 10.0);
        assert_eq!(report.max_ms, 6.0);
        assert_eq!(report.failures(), 1);
        assert!(report.wall_time_ms >= 0.0);
    }
}
