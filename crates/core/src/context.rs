//! Explicit run context carried by long-running loops.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Start timestamp of a run, passed explicitly to whoever measures uptime.
#[derive(Debug, Copy, Clone)]
pub struct RunContext {
    started: Instant,
    started_at: DateTime<Utc>,
}

impl RunContext {
    /// Capture "now" as the start of a run.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn from_parts(started: Instant, started_at: DateTime<Utc>) -> Self {
        Self { started, started_at }
    }

    /// Wall-clock time at which the run started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Monotonic time elapsed since the run started.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_measured_from_the_given_instant() {
        let earlier = Instant::now() - Duration::from_secs(5);
        let ctx = RunContext::from_parts(earlier, Utc::now());
        assert!(ctx.uptime() >= Duration::from_secs(5));
    }
}
