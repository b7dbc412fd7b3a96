//! Producer-facing queue service.

use serde_json::Value;
use tracing::{debug, info, warn};

use taskforge_core::{DomainError, JobId};
use taskforge_jobs::execution::execute;
use taskforge_jobs::{ExecutionResult, Job, JobPayload, JobRegistry, JobStats, JobStatus};

use super::store::{JobStore, JobStoreError};

/// Queue service error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// A job taken off the queue together with its execution outcome.
#[derive(Debug, Clone)]
pub struct ProcessedJob {
    /// The job as it was written back
    pub job: Job,
    pub outcome: ExecutionResult,
}

impl ProcessedJob {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Validates dispatches against a registry and processes jobs from a store.
#[derive(Debug, Clone)]
pub struct JobQueue<S, R> {
    store: S,
    registry: R,
}

impl<S: JobStore, R: JobRegistry> JobQueue<S, R> {
    pub fn new(store: S, registry: R) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Queue a job. Unknown names are rejected and nothing is persisted.
    pub fn dispatch(&self, name: &str, payload: JobPayload) -> Result<Job, QueueError> {
        if !self.registry.contains(name) {
            return Err(DomainError::validation(self.registry.unknown(name).to_string()).into());
        }
        let job = self.store.push(name, payload)?;
        info!(job_id = %job.id, name = %job.name, "job dispatched");
        Ok(job)
    }

    /// Parse a JSON payload and queue the job.
    pub fn dispatch_json(&self, name: &str, payload: &str) -> Result<Job, QueueError> {
        let payload = match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(DomainError::validation(format!("payload must be a JSON object, got {other}")).into());
            }
            Err(e) => return Err(DomainError::validation(format!("payload is not valid JSON: {e}")).into()),
        };
        self.dispatch(name, payload)
    }

    /// Claim the next pending job, run it and write the outcome back.
    ///
    /// `Ok(None)` when nothing was pending or another worker won the claim.
    pub fn process_next(&self) -> Result<Option<ProcessedJob>, QueueError> {
        let Some(mut job) = self.store.claim_next()? else {
            return Ok(None);
        };
        debug!(job_id = %job.id, name = %job.name, attempts = job.attempts, "claimed job");

        let outcome = match self.registry.resolve(&job.name, &job.payload) {
            Ok(handler) => execute(&job.name, handler),
            Err(e) => ExecutionResult::failure(&job.name, e.to_string(), 0.0),
        };

        let now = chrono::Utc::now();
        let written = match (&outcome.result, &outcome.error) {
            (Some(result), None) => {
                let written = self.store.complete(job.id, result, outcome.elapsed_ms)?;
                job.mark_done(result.clone(), outcome.elapsed_ms, now);
                written
            }
            _ => {
                let error = outcome.error.as_deref().unwrap_or("handler returned no result");
                let written = self.store.fail(job.id, error, Some(outcome.elapsed_ms))?;
                job.mark_failed(error, Some(outcome.elapsed_ms), now);
                warn!(job_id = %job.id, name = %job.name, error = %error, "job failed");
                written
            }
        };
        if !written {
            warn!(job_id = %job.id, "job left processing state before its outcome was written");
        }

        info!(
            job_id = %job.id,
            name = %job.name,
            status = %job.status,
            elapsed_ms = outcome.elapsed_ms,
            "job processed"
        );
        Ok(Some(ProcessedJob { job, outcome }))
    }

    pub fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get(id)?)
    }

    pub fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.list(status, limit)?)
    }

    pub fn stats(&self) -> Result<JobStats, QueueError> {
        Ok(self.store.stats()?)
    }

    pub fn cancel(&self, id: JobId) -> Result<bool, QueueError> {
        let cancelled = self.store.cancel(id)?;
        info!(job_id = %id, cancelled, "cancel requested");
        Ok(cancelled)
    }

    pub fn purge(&self, older_than_days: u32) -> Result<u64, QueueError> {
        Ok(self.store.purge(older_than_days)?)
    }
}
