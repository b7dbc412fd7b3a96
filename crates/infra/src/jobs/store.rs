//! Job storage abstraction and the in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{Duration, Utc};
use serde_json::Value;

use taskforge_core::JobId;
use taskforge_jobs::{Job, JobPayload, JobStats, JobStatus};

/// Job store abstraction.
///
/// Every state change is conditional on the current status, so concurrent
/// callers never double-process a job. "Not found" and "lost the race" are
/// reported through return values, never as errors.
pub trait JobStore: Send + Sync {
    /// Insert a new pending job.
    fn push(&self, name: &str, payload: JobPayload) -> Result<Job, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// List jobs, newest first, optionally filtered by status.
    fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Claim the oldest pending job.
    /// Returns None when the queue is empty or another caller won the claim.
    fn claim_next(&self) -> Result<Option<Job>, JobStoreError>;

    /// Record a result for a processing job.
    fn complete(&self, id: JobId, result: &Value, elapsed_ms: f64) -> Result<bool, JobStoreError>;

    /// Record a failure for a processing job.
    fn fail(&self, id: JobId, error: &str, elapsed_ms: Option<f64>) -> Result<bool, JobStoreError>;

    /// Cancel a pending job. False when missing or already claimed.
    fn cancel(&self, id: JobId) -> Result<bool, JobStoreError>;

    /// Delete terminal jobs; `0` days means all of them.
    fn purge(&self, older_than_days: u32) -> Result<u64, JobStoreError>;

    /// Counts per status.
    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Default)]
struct Table {
    last_id: i64,
    rows: BTreeMap<JobId, Job>,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    table: RwLock<Table>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Table>, JobStoreError> {
        self.table
            .read()
            .map_err(|_| JobStoreError::Storage("job table lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Table>, JobStoreError> {
        self.table
            .write()
            .map_err(|_| JobStoreError::Storage("job table lock poisoned".to_string()))
    }
}

impl JobStore for InMemoryJobStore {
    fn push(&self, name: &str, payload: JobPayload) -> Result<Job, JobStoreError> {
        let mut table = self.write()?;
        table.last_id += 1;
        let job = Job::pending(JobId::new(table.last_id), name, payload, Utc::now());
        table.rows.insert(job.id, job.clone());
        Ok(job)
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.read()?.rows.get(&id).cloned())
    }

    fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let table = self.read()?;
        let mut result: Vec<_> = table
            .rows
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();

        result.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        result.truncate(limit);
        Ok(result)
    }

    fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        // Select the candidate under a read lock, then claim it conditionally.
        let candidate = {
            let table = self.read()?;
            table
                .rows
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .min_by_key(|j| (j.created_at, j.id))
                .map(|j| j.id)
        };
        let Some(id) = candidate else {
            return Ok(None);
        };

        let mut table = self.write()?;
        match table.rows.get_mut(&id) {
            Some(job) => Ok(job.mark_processing(Utc::now()).then(|| job.clone())),
            None => Ok(None),
        }
    }

    fn complete(&self, id: JobId, result: &Value, elapsed_ms: f64) -> Result<bool, JobStoreError> {
        let mut table = self.write()?;
        Ok(table
            .rows
            .get_mut(&id)
            .is_some_and(|job| job.mark_done(result.clone(), elapsed_ms, Utc::now())))
    }

    fn fail(&self, id: JobId, error: &str, elapsed_ms: Option<f64>) -> Result<bool, JobStoreError> {
        let mut table = self.write()?;
        Ok(table
            .rows
            .get_mut(&id)
            .is_some_and(|job| job.mark_failed(error, elapsed_ms, Utc::now())))
    }

    fn cancel(&self, id: JobId) -> Result<bool, JobStoreError> {
        let mut table = self.write()?;
        Ok(table
            .rows
            .get_mut(&id)
            .is_some_and(|job| job.mark_cancelled(Utc::now())))
    }

    fn purge(&self, older_than_days: u32) -> Result<u64, JobStoreError> {
        let cutoff = (older_than_days > 0).then(|| Utc::now() - Duration::days(i64::from(older_than_days)));
        let mut table = self.write()?;
        let before = table.rows.len();
        table
            .rows
            .retain(|_, job| !(job.status.is_terminal() && cutoff.is_none_or(|c| job.created_at < c)));
        Ok((before - table.rows.len()) as u64)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let table = self.read()?;
        let mut stats = JobStats::default();
        for job in table.rows.values() {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn push(&self, name: &str, payload: JobPayload) -> Result<Job, JobStoreError> {
        (**self).push(name, payload)
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(id)
    }

    fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        (**self).list(status, limit)
    }

    fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next()
    }

    fn complete(&self, id: JobId, result: &Value, elapsed_ms: f64) -> Result<bool, JobStoreError> {
        (**self).complete(id, result, elapsed_ms)
    }

    fn fail(&self, id: JobId, error: &str, elapsed_ms: Option<f64>) -> Result<bool, JobStoreError> {
        (**self).fail(id, error, elapsed_ms)
    }

    fn cancel(&self, id: JobId) -> Result<bool, JobStoreError> {
        (**self).cancel(id)
    }

    fn purge(&self, older_than_days: u32) -> Result<u64, JobStoreError> {
        (**self).purge(older_than_days)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }
}
