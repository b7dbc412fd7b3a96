//! Execution engine.
//!
//! A [`Batch`] of named handlers goes in, one [`ExecutionResult`] per handler
//! comes out, in input order, whichever [`Strategy`] ran them:
//!
//! - `Sequential`: one after another on the caller's thread
//! - `Cooperative`: round-robin on the caller's thread, see [`CooperativeScheduler`]
//! - `Parallel`: one child process per job, see [`WorkerProgram`]

mod benchmark;
mod cooperative;
mod parallel;
mod result;
mod sequential;

use std::str::FromStr;

use tracing::{info, warn};

use taskforge_core::DomainError;

use crate::record::JobPayload;
use crate::registry::{Handler, JobRegistry, RegistryError};

pub use benchmark::BenchmarkReport;
pub use cooperative::{yield_now, CooperativeScheduler, YieldNow, DEFAULT_MAX_CONCURRENT};
pub use parallel::{interpret, run_child, run_parallel, SubprocessOutput, WorkerProgram, JOB_RUNNER};
pub use result::{max_ms, total_ms, ExecutionResult};
pub use sequential::{execute, run_sequential};

/// How a batch is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Sequential,
    Cooperative,
    Parallel,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Sequential, Strategy::Cooperative, Strategy::Parallel];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Cooperative => "cooperative",
            Strategy::Parallel => "parallel",
        }
    }
}

impl core::fmt::Display for Strategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "sync" | "sync_sequential" => Ok(Strategy::Sequential),
            "cooperative" | "async" | "async_fiber" => Ok(Strategy::Cooperative),
            "parallel" | "parallel_subprocess" => Ok(Strategy::Parallel),
            other => Err(DomainError::validation(format!(
                "unknown strategy `{other}` (expected sync, async or parallel)"
            ))),
        }
    }
}

/// Ordered list of `(name, handler)` pairs.
#[derive(Default)]
pub struct Batch {
    jobs: Vec<(String, Handler)>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every name against `registry` with an empty payload.
    pub fn from_registry<R, I, N>(registry: &R, names: I) -> Result<Self, RegistryError>
    where
        R: JobRegistry + ?Sized,
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        let payload = JobPayload::new();
        let mut batch = Self::new();
        for name in names {
            let name = name.as_ref();
            batch.push(name, registry.resolve(name, &payload)?);
        }
        Ok(batch)
    }

    pub fn push(&mut self, name: impl Into<String>, handler: Handler) {
        self.jobs.push((name.into(), handler));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.jobs.iter().map(|(name, _)| name.clone()).collect()
    }
}

impl core::fmt::Debug for Batch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Batch").field("jobs", &self.names()).finish()
    }
}

impl IntoIterator for Batch {
    type Item = (String, Handler);
    type IntoIter = std::vec::IntoIter<(String, Handler)>;

    fn into_iter(self) -> Self::IntoIter {
        self.jobs.into_iter()
    }
}

/// Runs batches under a chosen strategy.
#[derive(Debug, Clone)]
pub struct Engine {
    max_concurrent: usize,
    worker: WorkerProgram,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(WorkerProgram::default())
    }
}

impl Engine {
    pub fn new(worker: WorkerProgram) -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            worker,
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn worker(&self) -> &WorkerProgram {
        &self.worker
    }

    /// Run every job in `batch` and return results in input order.
    ///
    /// `Parallel` only forwards job names: each child re-resolves its job by
    /// name with the default payload, so the batch's handler closures (and any
    /// custom payloads baked into them) are dropped. A batch built from custom
    /// handlers can therefore give different results under `Parallel` than
    /// under the in-process strategies.
    pub fn run(&self, strategy: Strategy, batch: Batch) -> Vec<ExecutionResult> {
        info!(strategy = %strategy, jobs = batch.len(), "running batch");
        match strategy {
            Strategy::Sequential => run_sequential(batch),
            Strategy::Cooperative => self.run_cooperative(batch),
            Strategy::Parallel => {
                if self.worker.is_available() {
                    run_parallel(&self.worker, batch.names())
                } else {
                    warn!(
                        program = %self.worker.program().display(),
                        "worker program unavailable, falling back to cooperative execution"
                    );
                    self.run_cooperative(batch)
                }
            }
        }
    }

    /// Run and time a batch.
    pub fn benchmark(&self, strategy: Strategy, batch: Batch) -> BenchmarkReport {
        let report = BenchmarkReport::measure(strategy.as_str(), || self.run(strategy, batch));
        info!(
            strategy = %strategy,
            wall_time_ms = report.wall_time_ms,
            total_ms = report.total_ms,
            max_ms = report.max_ms,
            failures = report.failures(),
            "batch finished"
        );
        report
    }

    fn run_cooperative(&self, batch: Batch) -> Vec<ExecutionResult> {
        let mut scheduler = CooperativeScheduler::new(self.max_concurrent);
        for (name, handler) in batch {
            scheduler.add(name, handler);
        }
        scheduler.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{HeavyJobs, JobError};
    use serde_json::json;

    fn unavailable() -> Engine {
        Engine::new(WorkerProgram::new("/definitely/not/here/taskforge-job"))
    }

    fn five_with_one_failure() -> Batch {
        let mut batch = Batch::new();
        for i in 0..5 {
            if i == 2 {
                batch.push(format!("job-{i}"), Box::new(|| Err(JobError::new("job 2 failed"))));
            } else {
                batch.push(format!("job-{i}"), Box::new(move || Ok(json!(i))));
            }
        }
        batch
    }

    #[test]
    fn strategy_parses_aliases() {
        assert_eq!("sync".parse::<Strategy>().unwrap(), Strategy::Sequential);
        assert_eq!("ASYNC".parse::<Strategy>().unwrap(), Strategy::Cooperative);
        assert_eq!("parallel_subprocess".parse::<Strategy>().unwrap(), Strategy::Parallel);
        assert!("threads".parse::<Strategy>().is_err());
        for s in Strategy::ALL {
            assert_eq!(s.to_string().parse::<Strategy>().unwrap(), s);
        }
    }

    #[test]
    fn partial_failure_is_isolated_under_every_strategy() {
        let engine = unavailable();
        for strategy in Strategy::ALL {
            let results = engine.run(strategy, five_with_one_failure());
            assert_eq!(results.len(), 5, "{strategy}");
            assert_eq!(results.iter().filter(|r| r.is_success()).count(), 4, "{strategy}");
            assert_eq!(results[2].error.as_deref(), Some("job 2 failed"), "{strategy}");
        }
    }

    #[test]
    fn parallel_falls_back_when_worker_is_missing() {
        let results = unavailable().run(Strategy::Parallel, five_with_one_failure());
        assert!(results.iter().all(|r| r.exit_code.is_none()));
    }

    #[test]
    fn empty_batch_reports_zero() {
        let report = unavailable().benchmark(Strategy::Sequential, Batch::new());
        assert!(report.jobs.is_empty());
        assert_eq!(report.total_ms, 0.0);
        assert_eq!(report.max_ms, 0.0);
    }

    #[test]
    fn batch_from_registry_rejects_unknown_names() {
        let batch = Batch::from_registry(&HeavyJobs, ["primes", "hash"]).unwrap();
        assert_eq!(batch.names(), vec!["primes", "hash"]);
        assert!(Batch::from_registry(&HeavyJobs, ["primes", "bogus"]).is_err());
    }
}
