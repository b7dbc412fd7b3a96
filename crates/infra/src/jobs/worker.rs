//! Long-running worker loop.
//!
//! Repeatedly claims and runs the next queued job until stopped, until
//! `max_jobs` jobs have been handled, or forever. The stop signal is only
//! observed between jobs; a running handler is never interrupted.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use taskforge_core::RunContext;
use taskforge_jobs::JobRegistry;

use super::queue::JobQueue;
use super::store::JobStore;

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Name for logging and the worker thread
    pub name: String,
    /// Sleep between polls of an empty queue, and after store errors
    pub poll_interval: Duration,
    /// Stop after this many handled jobs; `0` runs until stopped
    pub max_jobs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "taskforge-worker".to_string(),
            poll_interval: Duration::from_millis(500),
            max_jobs: 0,
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_jobs(mut self, max_jobs: u64) -> Self {
        self.max_jobs = max_jobs;
        self
    }
}

/// Cloneable stop flag shared between a worker and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Final counters of a worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Jobs that finished `done`
    pub processed: u64,
    /// Jobs that finished `failed`, plus store errors
    pub failed: u64,
    pub uptime: Duration,
}

impl WorkerReport {
    pub fn handled(&self) -> u64 {
        self.processed + self.failed
    }
}

/// Called once with the final report when the loop exits.
pub type ShutdownHook = Box<dyn Fn(&WorkerReport) + Send + Sync>;

/// Background job worker.
pub struct Worker<S, R> {
    queue: JobQueue<S, R>,
    config: WorkerConfig,
    on_shutdown: Option<ShutdownHook>,
}

impl<S: JobStore, R: JobRegistry> Worker<S, R> {
    pub fn new(queue: JobQueue<S, R>, config: WorkerConfig) -> Self {
        Self {
            queue,
            config,
            on_shutdown: None,
        }
    }

    pub fn on_shutdown<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkerReport) + Send + Sync + 'static,
    {
        self.on_shutdown = Some(Box::new(hook));
        self
    }

    /// Run the loop on the current thread.
    pub fn run(&self, stop: &StopHandle, ctx: RunContext) -> WorkerReport {
        let name = self.config.name.as_str();
        let max_jobs = self.config.max_jobs;
        info!(worker = %name, max_jobs, poll_interval_ms = self.config.poll_interval.as_millis() as u64, "worker started");

        let mut report = WorkerReport::default();
        // Jobs actually claimed; store errors do not use up the limit.
        let mut handled = 0u64;
        while !stop.is_stopped() {
            match self.queue.process_next() {
                Ok(Some(processed)) => {
                    if processed.succeeded() {
                        report.processed += 1;
                    } else {
                        report.failed += 1;
                    }
                    handled += 1;
                    if max_jobs > 0 && handled >= max_jobs {
                        debug!(worker = %name, handled, "job limit reached");
                        break;
                    }
                }
                Ok(None) => self.pause(stop),
                Err(e) => {
                    report.failed += 1;
                    error!(worker = %name, error = %e, "failed to process job");
                    self.pause(stop);
                }
            }
        }

        report.uptime = ctx.uptime();
        info!(
            worker = %name,
            processed = report.processed,
            failed = report.failed,
            uptime_ms = report.uptime.as_millis() as u64,
            "worker stopped"
        );
        if let Some(hook) = &self.on_shutdown {
            hook(&report);
        }
        report
    }

    /// Sleep for the poll interval, waking early when stopped.
    fn pause(&self, stop: &StopHandle) {
        let slice = Duration::from_millis(50);
        let deadline = Instant::now() + self.config.poll_interval;
        while !stop.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}

impl<S, R> Worker<S, R>
where
    S: JobStore + 'static,
    R: JobRegistry + 'static,
{
    /// Spawn the loop on a named background thread.
    pub fn spawn(self) -> io::Result<WorkerHandle> {
        let stop = StopHandle::new();
        let thread_stop = stop.clone();
        let ctx = RunContext::start();

        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || self.run(&thread_stop, ctx))?;

        Ok(WorkerHandle {
            stop,
            join: Some(join),
        })
    }
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    stop: StopHandle,
    join: Option<thread::JoinHandle<WorkerReport>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) -> Option<WorkerReport> {
        self.stop.stop();
        self.join.take().and_then(|j| j.join().ok())
    }

    /// Wait for the worker to stop on its own.
    pub fn join(mut self) -> Option<WorkerReport> {
        self.join.take().and_then(|j| j.join().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use serde_json::Value;
    use taskforge_core::JobId;
    use taskforge_jobs::{HeavyJobs, Job, JobPayload, JobStats, JobStatus};

    use crate::jobs::store::{InMemoryJobStore, JobStoreError};

    fn fast() -> WorkerConfig {
        WorkerConfig::default().with_poll_interval(Duration::from_millis(10))
    }

    fn small(limit: u64) -> JobPayload {
        let mut payload = JobPayload::new();
        payload.insert("limit".into(), limit.into());
        payload
    }

    #[test]
    fn stops_after_max_jobs_counting_failures() {
        let store = InMemoryJobStore::arc();
        let queue = JobQueue::new(store.clone(), HeavyJobs);
        queue.dispatch("primes", small(10)).unwrap();
        queue.dispatch_json("fibonacci", r#"{"n": 1000}"#).unwrap();
        queue.dispatch("primes", small(10)).unwrap();

        let worker = Worker::new(queue, fast().with_max_jobs(2));
        let report = worker.run(&StopHandle::new(), RunContext::start());

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.stats().unwrap().count(JobStatus::Pending), 1);
    }

    #[test]
    fn stop_handle_ends_an_idle_worker() {
        let worker = Worker::new(JobQueue::new(InMemoryJobStore::arc(), HeavyJobs), fast());
        let handle = worker.spawn().unwrap();
        thread::sleep(Duration::from_millis(50));

        let report = handle.shutdown().unwrap();
        assert_eq!(report.handled(), 0);
        assert!(report.uptime >= Duration::from_millis(50));
    }

    #[test]
    fn pre_stopped_worker_claims_nothing() {
        let store = InMemoryJobStore::arc();
        let queue = JobQueue::new(store.clone(), HeavyJobs);
        queue.dispatch("primes", small(10)).unwrap();

        let stop = StopHandle::new();
        stop.stop();
        let report = Worker::new(queue, fast()).run(&stop, RunContext::start());

        assert_eq!(report.handled(), 0);
        assert_eq!(store.stats().unwrap().count(JobStatus::Pending), 1);
    }

    #[test]
    fn shutdown_hook_receives_the_final_report() {
        let store = InMemoryJobStore::arc();
        let queue = JobQueue::new(store, HeavyJobs);
        queue.dispatch("primes", small(10)).unwrap();

        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let report = Worker::new(queue, fast().with_max_jobs(1))
            .on_shutdown(move |r| *sink.lock().unwrap() = Some(*r))
            .run(&StopHandle::new(), RunContext::start());

        assert_eq!(*seen.lock().unwrap(), Some(report));
        assert_eq!(report.processed, 1);
    }

    /// Fails `claim_next` a fixed number of times, then behaves.
    struct FlakyStore {
        inner: InMemoryJobStore,
        failures_left: AtomicUsize,
    }

    impl JobStore for FlakyStore {
        fn push(&self, name: &str, payload: JobPayload) -> Result<Job, JobStoreError> {
            self.inner.push(name, payload)
        }
        fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
            self.inner.get(id)
        }
        fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
            self.inner.list(status, limit)
        }
        fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(JobStoreError::Connection("database is gone".into()));
            }
            self.inner.claim_next()
        }
        fn complete(&self, id: JobId, result: &Value, elapsed_ms: f64) -> Result<bool, JobStoreError> {
            self.inner.complete(id, result, elapsed_ms)
        }
        fn fail(&self, id: JobId, error: &str, elapsed_ms: Option<f64>) -> Result<bool, JobStoreError> {
            self.inner.fail(id, error, elapsed_ms)
        }
        fn cancel(&self, id: JobId) -> Result<bool, JobStoreError> {
            self.inner.cancel(id)
        }
        fn purge(&self, older_than_days: u32) -> Result<u64, JobStoreError> {
            self.inner.purge(older_than_days)
        }
        fn stats(&self) -> Result<JobStats, JobStoreError> {
            self.inner.stats()
        }
    }

    #[test]
    fn store_errors_count_as_failures_and_back_off() {
        let store = FlakyStore {
            inner: InMemoryJobStore::new(),
            failures_left: AtomicUsize::new(2),
        };
        store.push("primes", small(10)).unwrap();

        let started = Instant::now();
        let worker = Worker::new(JobQueue::new(store, HeavyJobs), fast().with_max_jobs(1));
        let report = worker.run(&StopHandle::new(), RunContext::start());

        assert_eq!(report.failed, 2);
        assert_eq!(report.processed, 1);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn once_survives_a_transient_claim_failure() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryJobStore::new(),
            failures_left: AtomicUsize::new(1),
        });
        store.push("primes", small(10)).unwrap();

        let worker = Worker::new(JobQueue::new(store.clone(), HeavyJobs), fast().with_max_jobs(1));
        let report = worker.run(&StopHandle::new(), RunContext::start());

        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(store.stats().unwrap().count(JobStatus::Done), 1);
        assert_eq!(store.stats().unwrap().count(JobStatus::Pending), 0);
    }
}
