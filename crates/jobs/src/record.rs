//! Job record and lifecycle.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskforge_core::{DomainError, JobId};

/// Error text written when a pending job is cancelled administratively.
pub const CANCELLED_ERROR: &str = "cancelled by user";

/// Job arguments, always a JSON object.
pub type JobPayload = serde_json::Map<String, serde_json::Value>;

/// Lifecycle state of a job.
///
/// `Pending → Processing → {Done, Failed}`. Nothing re-enters `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be claimed
    Pending,
    /// Claimed by a worker
    Processing,
    /// Handler returned a result
    Done,
    /// Handler failed, or the job was cancelled while pending
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Done,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// A persisted unit of queued work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Store-assigned surrogate key
    pub id: JobId,
    /// Registry name of the handler
    pub name: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    /// Number of successful claims
    pub attempts: u32,
    /// Handler output, set only on `Done`
    pub result: Option<serde_json::Value>,
    /// Failure text, set only on `Failed`
    pub error: Option<String>,
    /// Handler wall time in milliseconds
    pub elapsed_ms: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the job reaches a terminal state
    pub processed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A freshly inserted pending job.
    pub fn pending(id: JobId, name: impl Into<String>, payload: JobPayload, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
            elapsed_ms: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// Claim: `Pending → Processing`, one more attempt.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Processing;
        self.attempts += 1;
        self.updated_at = now;
        true
    }

    /// `Processing → Done` with the handler result.
    pub fn mark_done(&mut self, result: serde_json::Value, elapsed_ms: f64, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Done;
        self.result = Some(result);
        self.error = None;
        self.elapsed_ms = Some(elapsed_ms);
        self.updated_at = now;
        self.processed_at = Some(now);
        true
    }

    /// `Processing → Failed` with the handler error.
    pub fn mark_failed(&mut self, error: impl Into<String>, elapsed_ms: Option<f64>, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Failed;
        self.result = None;
        self.error = Some(error.into());
        self.elapsed_ms = elapsed_ms;
        self.updated_at = now;
        self.processed_at = Some(now);
        true
    }

    /// Administrative cancel: only a pending job can be cancelled.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(CANCELLED_ERROR.to_string());
        self.updated_at = now;
        self.processed_at = Some(now);
        true
    }
}

/// Aggregate queue counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: u64,
    pub by_status: BTreeMap<JobStatus, u64>,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus, count: u64) {
        self.total += count;
        *self.by_status.entry(status).or_insert(0) += count;
    }

    pub fn count(&self, status: JobStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Job {
        Job::pending(JobId::new(1), "primes", JobPayload::new(), Utc::now())
    }

    #[test]
    fn job_lifecycle() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);

        assert!(job.mark_processing(Utc::now()));
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);

        assert!(job.mark_done(json!({"count": 41538}), 12.5, Utc::now()));
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.processed_at.is_some());
        assert!(job.error.is_none());
    }

    #[test]
    fn terminal_writes_require_processing() {
        let mut job = job();
        assert!(!job.mark_done(json!(1), 1.0, Utc::now()));
        assert!(!job.mark_failed("boom", None, Utc::now()));
        assert_eq!(job.status, JobStatus::Pending);

        job.mark_processing(Utc::now());
        assert!(job.mark_failed("boom", Some(3.0), Utc::now()));
        assert!(!job.mark_done(json!(1), 1.0, Utc::now()));
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.result.is_none());
    }

    #[test]
    fn cancel_only_from_pending() {
        let mut pending = job();
        assert!(pending.mark_cancelled(Utc::now()));
        assert_eq!(pending.status, JobStatus::Failed);
        assert_eq!(pending.error.as_deref(), Some(CANCELLED_ERROR));
        assert!(!pending.mark_processing(Utc::now()));

        let mut claimed = job();
        claimed.mark_processing(Utc::now());
        assert!(!claimed.mark_cancelled(Utc::now()));
        assert_eq!(claimed.status, JobStatus::Processing);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn stats_accumulate_per_status() {
        let mut stats = JobStats::default();
        stats.record(JobStatus::Pending, 3);
        stats.record(JobStatus::Done, 2);
        stats.record(JobStatus::Pending, 1);
        assert_eq!(stats.total, 6);
        assert_eq!(stats.count(JobStatus::Pending), 4);
        assert_eq!(stats.count(JobStatus::Failed), 0);

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["by_status"]["pending"], 4);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Claim,
            Complete,
            Fail,
            Cancel,
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![Just(Op::Claim), Just(Op::Complete), Just(Op::Fail), Just(Op::Cancel)]
        }

        proptest! {
            #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

            #[test]
            fn transitions_are_monotonic(ops in prop::collection::vec(op(), 0..20)) {
                let mut job = job();
                let mut claims = 0u32;
                for op in ops {
                    let before = job.status;
                    let applied = match op {
                        Op::Claim => job.mark_processing(Utc::now()),
                        Op::Complete => job.mark_done(json!(true), 1.0, Utc::now()),
                        Op::Fail => job.mark_failed("err", Some(1.0), Utc::now()),
                        Op::Cancel => job.mark_cancelled(Utc::now()),
                    };
                    if applied && matches!(op, Op::Claim) {
                        claims += 1;
                    }
                    prop_assert!(job.status >= before);
                    prop_assert_eq!(job.attempts, claims);
                    if job.status.is_terminal() {
                        prop_assert!(job.result.is_some() != job.error.is_some());
                    } else {
                        prop_assert!(job.result.is_none() && job.error.is_none());
                    }
                }
                prop_assert!(claims <= 1);
            }
        }
    }
}
