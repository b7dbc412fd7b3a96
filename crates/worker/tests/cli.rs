//! Drives the `taskforge-worker` binary against a throwaway SQLite database.

use std::path::Path;
use std::process::Command;

use serde_json::Value;

fn worker(db: &Path, args: &[&str]) -> Value {
    let url = format!("sqlite://{}?mode=rwc", db.display());
    let output = Command::new(env!("CARGO_BIN_EXE_taskforge-worker"))
        .arg("--database-url")
        .arg(&url)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn dispatch_run_once_and_inspect() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("jobs.db");

    let job = worker(&db, &["dispatch", "primes", "--payload", r#"{"limit": 100}"#]);
    assert_eq!(job["status"], "pending");
    let id = job["id"].as_i64().unwrap().to_string();

    let report = worker(&db, &["run", "--once", "--sleep", "10"]);
    assert_eq!(report["processed"], 1);
    assert_eq!(report["failed"], 0);

    let stats = worker(&db, &["stats"]);
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["by_status"]["done"], 1);

    let listed = worker(&db, &["list", "--status", "done"]);
    assert_eq!(listed[0]["result"]["count"], 25);

    let cancel = worker(&db, &["cancel", &id]);
    assert_eq!(cancel["cancelled"], false);

    let purge = worker(&db, &["purge"]);
    assert_eq!(purge["deleted"], 1);
}

#[test]
fn dispatch_rejects_unknown_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("jobs.db").display());
    let output = Command::new(env!("CARGO_BIN_EXE_taskforge-worker"))
        .args(["--database-url", &url, "dispatch", "bogus"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown job `bogus`"));
}

#[test]
fn bench_reports_one_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let report = worker(&dir.path().join("jobs.db"), &["bench", "sync", "--job", "fibonacci", "--job", "primes"]);

    assert_eq!(report["mode"], "sequential");
    assert_eq!(report["jobs"].as_array().unwrap().len(), 2);
    assert_eq!(report["jobs"][0]["result"]["fib"], 9_227_465);
    assert!(report["wall_time_ms"].as_f64().unwrap() >= 0.0);
}
