//! strload-loader — claims cut load tasks and executes them as bulk-load
//! jobs against the destination store.

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use strload_core::config::{load_dotenv, Config};
use strload_loader::{Loader, ManifestStore};
use strload_service::worker::spawn_signal_listener;
use strload_service::PollWorker;
use strload_store::{init_pg_pool, JobRegistry};

/// Streaming-load worker: claim tasks, run bulk loads, record outcomes.
#[derive(Parser, Debug)]
#[command(name = "strload-loader", version, about)]
struct Cli {
    /// Execution environment (config profile name).
    #[arg(short = 'e', long)]
    environment: Option<String>,

    /// Execute one specific task and exit (disables server mode).
    #[arg(long)]
    task_seq: Option<i64>,

    /// With --task-seq: execute even if the task already has a job.
    #[arg(long)]
    rerun: bool,

    /// Worker identity recorded on claimed jobs [default: hostname-pid].
    #[arg(long)]
    worker_id: Option<String>,
}

fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}-{}", host, std::process::id())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    load_dotenv();
    let config = match cli.environment {
        Some(ref env) => Config::for_profile(env),
        None => Config::from_env(),
    };
    config.log_summary();

    let control_pool = init_pg_pool(&config.control).await?;
    let dest_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.destination.database_url())
        .await?;

    let worker_id = cli.worker_id.unwrap_or_else(default_worker_id);
    info!(worker_id = %worker_id, "Loader starting");

    let jobs = JobRegistry::new(control_pool, worker_id);
    let manifests = ManifestStore::new(&config.aws)?;
    let loader = Loader::new(jobs.clone(), manifests, dest_pool, &config.destination);

    if let Some(task_seq) = cli.task_seq {
        // One-shot mode: claim the named task directly.
        match jobs.claim(task_seq, cli.rerun).await? {
            Some(job) => loader.execute(&job).await?,
            None => info!(
                task_seq,
                "Task not claimable (missing, or already executed — use --rerun)"
            ),
        }
        return Ok(());
    }

    let terminating = spawn_signal_listener();
    PollWorker::new(jobs, loader, config.dispatch.max_poll_wait_secs, terminating)
        .run()
        .await;

    Ok(())
}
