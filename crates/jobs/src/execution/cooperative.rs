//! Cooperative strategy: single-threaded round-robin over suspendable units.
//!
//! Each unit wraps a boxed future and is driven by explicit polls with a
//! no-op waker. Starting a unit is its first poll, resuming is every later
//! poll. Plain handlers run to completion on start; handlers written as
//! futures can give up the thread with [`yield_now`].

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use futures::task::noop_waker;
use serde_json::Value;
use tracing::trace;

use super::ExecutionResult;
use crate::registry::{Handler, JobError};

/// Default number of simultaneously active units.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    NotStarted,
    Suspended,
    Terminated,
}

struct Unit {
    index: usize,
    name: String,
    state: UnitState,
    task: Option<BoxFuture<'static, Result<Value, JobError>>>,
    started: Option<Instant>,
}

impl Unit {
    /// Start or resume the unit. Returns its result once it terminates.
    fn step(&mut self, cx: &mut Context<'_>) -> Option<ExecutionResult> {
        let task = self.task.as_mut()?;
        if self.state == UnitState::NotStarted {
            self.started = Some(Instant::now());
        }

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task.as_mut().poll(cx))) {
            Ok(Poll::Pending) => {
                self.state = UnitState::Suspended;
                return None;
            }
            Ok(Poll::Ready(outcome)) => outcome,
            Err(payload) => Err(JobError::from_panic(payload)),
        };

        self.state = UnitState::Terminated;
        self.task = None;
        let elapsed_ms = self
            .started
            .map(|s| s.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or_default();

        Some(match outcome {
            Ok(value) => ExecutionResult::success(&self.name, value, elapsed_ms),
            Err(e) => ExecutionResult::failure(&self.name, e.message, elapsed_ms),
        })
    }
}

/// Round-robin scheduler with a bounded active set.
pub struct CooperativeScheduler {
    max_concurrent: usize,
    backlog: VecDeque<Unit>,
}

impl CooperativeScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            backlog: VecDeque::new(),
        }
    }

    /// Queue a plain handler. It runs to completion when started.
    pub fn add(&mut self, name: impl Into<String>, handler: Handler) {
        self.spawn(name, async move { handler() });
    }

    /// Queue a future-based handler that may suspend.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        let index = self.backlog.len();
        self.backlog.push_back(Unit {
            index,
            name: name.into(),
            state: UnitState::NotStarted,
            task: Some(Box::pin(future)),
            started: None,
        });
    }

    pub fn len(&self) -> usize {
        self.backlog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backlog.is_empty()
    }

    /// Drive every unit to termination. Results come back in submission order.
    pub fn run(mut self) -> Vec<ExecutionResult> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut results: Vec<Option<ExecutionResult>> = (0..self.backlog.len()).map(|_| None).collect();
        let mut active: Vec<Unit> = Vec::with_capacity(self.max_concurrent);

        while !self.backlog.is_empty() || !active.is_empty() {
            while active.len() < self.max_concurrent {
                let Some(mut unit) = self.backlog.pop_front() else {
                    break;
                };
                trace!(name = %unit.name, index = unit.index, "starting unit");
                match unit.step(&mut cx) {
                    Some(result) => results[unit.index] = Some(result),
                    None => active.push(unit),
                }
            }

            active.retain_mut(|unit| match unit.step(&mut cx) {
                Some(result) => {
                    results[unit.index] = Some(result);
                    false
                }
                None => true,
            });
        }

        results.into_iter().flatten().collect()
    }
}

/// Suspend the current unit once, letting the others run.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
