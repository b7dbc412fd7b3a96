//! Job runner spawned by the parallel strategy.
//!
//! Usage: `taskforge-job <job-name>`. Prints one JSON object
//! `{"name", "result", "error", "elapsed_ms"}` on stdout and exits 0 on
//! success, 1 on failure or unknown job.

use std::process::ExitCode;

use taskforge_jobs::execution::run_child;
use taskforge_jobs::HeavyJobs;

fn main() -> ExitCode {
    let Some(name) = std::env::args().nth(1) else {
        eprintln!("usage: taskforge-job <job-name>");
        return ExitCode::from(2);
    };

    let (output, code) = run_child(&HeavyJobs, &name);
    match serde_json::to_string(&output) {
        Ok(line) => println!("{line}"),
        Err(e) => {
            eprintln!("failed to encode result: {e}");
            return ExitCode::FAILURE;
        }
    }

    if code == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
