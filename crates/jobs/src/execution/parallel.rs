//! Parallel strategy: one OS process per job.
//!
//! Every job is handed to a fresh `<program> [args] <job-name>` child with
//! stdin closed. The child answers with a single JSON object on stdout; stderr
//! is kept as the fallback error text. All children are spawned before any is
//! drained, then each is drained in turn.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::sequential;
use super::ExecutionResult;
use crate::record::JobPayload;
use crate::registry::JobRegistry;

/// File name of the bundled job runner.
pub const JOB_RUNNER: &str = "taskforge-job";

/// What a worker child prints on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubprocessOutput {
    pub name: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub elapsed_ms: Option<f64>,
}

/// The executable spawned for each job, plus any leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerProgram {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerProgram {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// The named binary next to the current executable.
    ///
    /// Test binaries live one level deeper (`target/<profile>/deps`), so the
    /// parent directory is tried as well.
    pub fn sibling(name: &str) -> io::Result<Self> {
        let exe = env::current_exe()?;
        let file = format!("{name}{}", env::consts::EXE_SUFFIX);
        let dir = exe
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "executable has no parent directory"))?;

        let candidate = dir.join(&file);
        if !candidate.is_file() && dir.ends_with("deps") {
            if let Some(up) = dir.parent() {
                let up = up.join(&file);
                if up.is_file() {
                    return Ok(Self::new(up));
                }
            }
        }
        Ok(Self::new(candidate))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether the program can be spawned on this host.
    pub fn is_available(&self) -> bool {
        if self.program.components().count() > 1 || self.program.is_absolute() {
            return self.program.is_file();
        }
        let Some(path) = env::var_os("PATH") else {
            return false;
        };
        env::split_paths(&path).any(|dir| {
            dir.join(&self.program).is_file()
                || dir
                    .join(format!("{}{}", self.program.display(), env::consts::EXE_SUFFIX))
                    .is_file()
        })
    }

    fn spawn(&self, job: &str) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .arg(job)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

impl Default for WorkerProgram {
    fn default() -> Self {
        Self::sibling(JOB_RUNNER).unwrap_or_else(|_| Self::new(JOB_RUNNER))
    }
}

/// Spawn one child per job, then collect every child's answer.
pub fn run_parallel(program: &WorkerProgram, names: Vec<String>) -> Vec<ExecutionResult> {
    let spawned: Vec<_> = names
        .into_iter()
        .map(|name| {
            let started = Instant::now();
            let child = program.spawn(&name);
            if let Err(e) = &child {
                warn!(name = %name, program = %program.program.display(), error = %e, "failed to spawn worker");
            }
            (name, started, child)
        })
        .collect();

    spawned
        .into_iter()
        .map(|(name, started, child)| match child {
            Ok(child) => match child.wait_with_output() {
                Ok(output) => {
                    let wall_ms = started.elapsed().as_secs_f64() * 1000.0;
                    interpret(&name, &output, wall_ms)
                }
                Err(e) => ExecutionResult::failure(&name, format!("failed to collect worker output: {e}"), 0.0),
            },
            Err(e) => ExecutionResult::failure(&name, format!("failed to spawn worker: {e}"), 0.0),
        })
        .collect()
}

/// Turn a finished child's output into an execution result.
pub fn interpret(name: &str, output: &Output, wall_ms: f64) -> ExecutionResult {
    let exit_code = output.status.code();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();

    let parsed = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| serde_json::from_str::<SubprocessOutput>(line).ok());

    let mut result = match parsed {
        Some(out) => ExecutionResult {
            name: name.to_string(),
            result: out.result,
            error: out.error,
            elapsed_ms: out.elapsed_ms.unwrap_or(wall_ms),
            exit_code: None,
        },
        None => {
            let error = if stderr.is_empty() {
                match exit_code {
                    Some(code) => format!("worker produced no parsable output (exit code {code})"),
                    None => "worker produced no parsable output (terminated by signal)".to_string(),
                }
            } else {
                stderr.to_string()
            };
            ExecutionResult::failure(name, error, wall_ms)
        }
    };

    if result.error.is_some() {
        result.result = None;
    }
    result.exit_code = exit_code;

    debug!(name = %name, exit_code = ?exit_code, ok = result.is_success(), "worker finished");
    result
}

/// Body of the job runner binary: resolve, execute, report.
///
/// Returns the line to print and the process exit status.
pub fn run_child<R: JobRegistry + ?Sized>(registry: &R, name: &str) -> (SubprocessOutput, i32) {
    let handler = match registry.resolve(name, &JobPayload::new()) {
        Ok(h) => h,
        Err(e) => {
            return (
                SubprocessOutput {
                    name: name.to_string(),
                    result: None,
                    error: Some(e.to_string()),
                    elapsed_ms: Some(0.0),
                },
                1,
            );
        }
    };

    let outcome = sequential::execute(name, handler);
    let code = if outcome.is_success() { 0 } else { 1 };
    (
        SubprocessOutput {
            name: outcome.name,
            result: outcome.result,
            error: outcome.error,
            elapsed_ms: Some(outcome.elapsed_ms),
        },
        code,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HeavyJobs;
    use serde_json::json;

    #[cfg(unix)]
    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        use std::os::unix::process::ExitStatusExt;
        Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[cfg(unix)]
    #[test]
    fn parses_the_last_json_line() {
        let out = output(0, "noise\n{\"name\":\"hash\",\"result\":{\"x\":1},\"error\":null,\"elapsed_ms\":4.5}\n", "");
        let r = interpret("hash", &out, 10.0);
        assert_eq!(r.result, Some(json!({"x": 1})));
        assert_eq!(r.elapsed_ms, 4.5);
        assert_eq!(r.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[test]
    fn falls_back_to_stderr_then_exit_code() {
        let r = interpret("hash", &output(2, "", "  boom \n"), 3.0);
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert_eq!(r.exit_code, Some(2));
        assert_eq!(r.elapsed_ms, 3.0);

        let r = interpret("hash", &output(3, "not json", ""), 3.0);
        assert_eq!(r.error.as_deref(), Some("worker produced no parsable output (exit code 3)"));
    }

    #[cfg(unix)]
    #[test]
    fn exit_code_is_recorded_without_setting_error() {
        let out = output(1, "{\"name\":\"hash\",\"result\":42,\"error\":null,\"elapsed_ms\":1.0}", "");
        let r = interpret("hash", &out, 5.0);
        assert_eq!(r.result, Some(json!(42)));
        assert_eq!(r.error, None);
        assert_eq!(r.exit_code, Some(1));

        let out = output(1, "{\"name\":\"hash\",\"result\":null,\"error\":\"bad input\"}", "ignored");
        let r = interpret("hash", &out, 5.0);
        assert_eq!(r.error.as_deref(), Some("bad input"));
        assert_eq!(r.result, None);
    }

    #[cfg(unix)]
    #[test]
    fn leading_args_come_before_the_job_name() {
        let program = WorkerProgram::new("/bin/sh")
            .with_args(["-c", r#"printf '{"name":"%s","result":"%s","error":null}\n' "$0" "$0""#]);
        assert_eq!(program.args().len(), 2);
        assert!(program.is_available());

        let results = run_parallel(&program, vec!["primes".into(), "hash".into()]);
        assert_eq!(results[0].result, Some(json!("primes")));
        assert_eq!(results[1].result, Some(json!("hash")));
        assert_eq!(results[1].exit_code, Some(0));
    }

    #[test]
    fn missing_program_is_unavailable() {
        assert!(!WorkerProgram::new("/definitely/not/here/taskforge-job").is_available());
        assert!(!WorkerProgram::new("taskforge-no-such-binary-on-path").is_available());
    }

    #[test]
    fn spawn_failures_are_reported_per_job() {
        let program = WorkerProgram::new("/definitely/not/here/taskforge-job");
        let results = run_parallel(&program, vec!["primes".into(), "hash".into()]);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.error.as_deref().unwrap_or("").starts_with("failed to spawn worker")));
        assert_eq!(results[1].name, "hash");
    }

    #[test]
    fn child_body_reports_unknown_jobs() {
        let (out, code) = run_child(&HeavyJobs, "nope");
        assert_eq!(code, 1);
        assert!(out.error.unwrap().starts_with("unknown job `nope`"));

        let (out, code) = run_child(&HeavyJobs, "fibonacci");
        assert_eq!(code, 0);
        assert_eq!(out.result, Some(json!({"n": 35, "fib": 9_227_465, "job": "fibonacci"})));
    }
}
