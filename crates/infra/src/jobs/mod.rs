//! Durable job queue.
//!
//! ## Components
//!
//! - `JobStore`: persistence with atomic claim (in-memory or SQLite)
//! - `JobQueue`: validated dispatch and single-job processing
//! - `Worker`: the polling loop with graceful shutdown

pub mod queue;
pub mod sql;
pub mod store;
pub mod worker;

pub use queue::{JobQueue, ProcessedJob, QueueError};
pub use sql::SqlJobStore;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use worker::{ShutdownHook, StopHandle, Worker, WorkerConfig, WorkerHandle, WorkerReport};
