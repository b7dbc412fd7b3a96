//! Sequential strategy: run each handler to completion on the caller's thread.

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::debug;

use super::{Batch, ExecutionResult};
use crate::registry::{Handler, JobError};

/// Run one handler, capturing its error or panic.
pub fn execute(name: &str, handler: Handler) -> ExecutionResult {
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(handler)).unwrap_or_else(|p| Err(JobError::from_panic(p)));
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    match outcome {
        Ok(value) => {
            debug!(name = %name, elapsed_ms, "job finished");
            ExecutionResult::success(name, value, elapsed_ms)
        }
        Err(e) => {
            debug!(name = %name, elapsed_ms, error = %e, "job failed");
            ExecutionResult::failure(name, e.message, elapsed_ms)
        }
    }
}

pub fn run_sequential(batch: Batch) -> Vec<ExecutionResult> {
    batch
        .into_iter()
        .map(|(name, handler)| execute(&name, handler))
        .collect()
}
