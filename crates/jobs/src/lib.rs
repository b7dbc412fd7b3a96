//! `taskforge-jobs`: job records, the job registry and the execution engine.
//!
//! Nothing in here touches storage: the engine runs batches of named handlers
//! under one of three strategies and reports per-job timing, result and error.
//! The `taskforge-job` binary in this crate is the worker program the parallel
//! strategy spawns.

pub mod execution;
pub mod heavy;
pub mod record;
pub mod registry;

pub use execution::{
    yield_now, Batch, BenchmarkReport, CooperativeScheduler, Engine, ExecutionResult, Strategy,
    SubprocessOutput, WorkerProgram,
};
pub use record::{Job, JobPayload, JobStats, JobStatus, CANCELLED_ERROR};
pub use registry::{Handler, HeavyJobs, JobError, JobKind, JobRegistry, RegistryError};
