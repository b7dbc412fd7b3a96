//! Command bodies. Store calls block, so they run on the blocking pool.

use anyhow::{bail, Context};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use taskforge_core::RunContext;
use taskforge_infra::jobs::{JobQueue, SqlJobStore, StopHandle, Worker, WorkerConfig};
use taskforge_infra::Settings;
use taskforge_jobs::{Batch, BenchmarkReport, Engine, HeavyJobs, JobRegistry, JobStatus, Strategy, WorkerProgram};

use crate::cli::Command;

type Queue = JobQueue<SqlJobStore, HeavyJobs>;

pub async fn execute(command: Command, settings: Settings) -> anyhow::Result<()> {
    match command {
        Command::Run { once, sleep, max_jobs } => run(settings, once, sleep, max_jobs).await,
        Command::Dispatch { name, payload } => {
            let queue = connect(&settings).await?;
            let job = blocking(move || queue.dispatch_json(&name, &payload)).await?;
            print_json(&job)
        }
        Command::Cancel { id } => {
            let queue = connect(&settings).await?;
            let cancelled = blocking(move || queue.cancel(id)).await?;
            print_json(&json!({ "id": id, "cancelled": cancelled }))
        }
        Command::Purge { days } => {
            let queue = connect(&settings).await?;
            let deleted = blocking(move || queue.purge(days)).await?;
            print_json(&json!({ "older_than_days": days, "deleted": deleted }))
        }
        Command::Stats => {
            let queue = connect(&settings).await?;
            let stats = blocking(move || queue.stats()).await?;
            print_json(&stats)
        }
        Command::List { status, limit } => list(settings, status, limit).await,
        Command::Bench { mode, jobs } => bench(settings, &mode, jobs).await,
    }
}

async fn run(settings: Settings, once: bool, sleep: Option<u64>, max_jobs: u64) -> anyhow::Result<()> {
    let queue = connect(&settings).await?;
    let poll_interval = sleep.map(std::time::Duration::from_millis).unwrap_or(settings.poll_interval);
    let config = WorkerConfig::default()
        .with_poll_interval(poll_interval)
        .with_max_jobs(if once { 1 } else { max_jobs });

    let stop = StopHandle::new();
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => signal_stop.stop(),
            Err(e) => warn!(error = %e, "failed to listen for shutdown signals"),
        }
    });

    let worker = Worker::new(queue, config).on_shutdown(|report| {
        info!(
            processed = report.processed,
            failed = report.failed,
            uptime_ms = report.uptime.as_millis() as u64,
            "shutdown complete"
        );
    });
    let ctx = RunContext::start();
    let report = tokio::task::spawn_blocking(move || worker.run(&stop, ctx))
        .await
        .context("worker thread panicked")?;

    print_json(&json!({
        "processed": report.processed,
        "failed": report.failed,
        "uptime_ms": report.uptime.as_millis() as u64,
        "started_at": ctx.started_at(),
    }))
}

async fn list(settings: Settings, status: Option<JobStatus>, limit: usize) -> anyhow::Result<()> {
    let queue = connect(&settings).await?;
    let jobs = blocking(move || queue.list(status, limit)).await?;
    print_json(&jobs)
}

async fn bench(settings: Settings, mode: &str, jobs: Vec<String>) -> anyhow::Result<()> {
    let strategies = if mode.eq_ignore_ascii_case("all") {
        Strategy::ALL.to_vec()
    } else {
        vec![mode.parse::<Strategy>()?]
    };
    let names = if jobs.is_empty() { HeavyJobs.names() } else { jobs };
    if let Some(unknown) = names.iter().find(|n| !HeavyJobs.contains(n)) {
        bail!("{}", HeavyJobs.unknown(unknown));
    }

    let program = settings.job_program.clone().map(WorkerProgram::new).unwrap_or_default();
    let engine = Engine::new(program).with_max_concurrent(settings.max_concurrent);

    let reports: Vec<BenchmarkReport> = tokio::task::spawn_blocking(move || {
        strategies
            .into_iter()
            .map(|strategy| -> anyhow::Result<BenchmarkReport> {
                let batch = Batch::from_registry(&HeavyJobs, &names)?;
                Ok(engine.benchmark(strategy, batch))
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await
    .context("benchmark thread panicked")??;

    match reports.as_slice() {
        [single] => print_json(single),
        _ => print_json(&reports),
    }
}

async fn connect(settings: &Settings) -> anyhow::Result<Queue> {
    let store = SqlJobStore::connect(&settings.database_url)
        .await
        .with_context(|| format!("failed to open job store at {}", settings.database_url))?;
    Ok(JobQueue::new(store, HeavyJobs))
}

/// Run a blocking store call off the async workers.
async fn blocking<T, E, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await.context("blocking task panicked")??)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("received SIGINT, stopping after the current job");
            }
            _ = terminate.recv() => {
                info!("received SIGTERM, stopping after the current job");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl-C, stopping after the current job");
    }

    Ok(())
}
