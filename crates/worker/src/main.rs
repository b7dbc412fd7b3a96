//! `taskforge-worker`: runs the job worker loop and administers the queue.

mod cli;
mod commands;

use clap::Parser;

use taskforge_infra::Settings;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap reads env-backed arguments.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    taskforge_observability::tracing::init(cli.log_format);

    let mut settings = Settings::from_env()?;
    if let Some(url) = cli.database_url {
        settings.database_url = url;
    }

    commands::execute(cli.command, settings).await
}
