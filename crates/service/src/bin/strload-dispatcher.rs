//! strload-dispatcher — consumes object-creation notifications, cuts load
//! tasks by batch-size/interval windowing, and fans them out to the task
//! queue.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use strload_core::config::{load_dotenv, Config};
use strload_queue::SqsQueue;
use strload_service::Dispatcher;
use strload_store::{init_pg_pool, ObjectBuffer, TargetTableRegistry, TaskStore};

/// Streaming-load dispatcher: notifications in, load tasks out.
#[derive(Parser, Debug)]
#[command(name = "strload-dispatcher", version, about)]
struct Cli {
    /// Execution environment (config profile name).
    #[arg(short = 'e', long)]
    environment: Option<String>,

    /// Run one windowing evaluation and exit instead of serving.
    #[arg(long)]
    once: bool,
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

    let pool = init_pg_pool(&config.control).await?;

    let event_queue = Arc::new(SqsQueue::new(
        &config.aws,
        &config.queue.event_queue_url,
        config.queue.visibility_timeout_secs,
    ));
    let task_queue = Arc::new(SqsQueue::new(
        &config.aws,
        &config.queue.task_queue_url,
        config.queue.visibility_timeout_secs,
    ));

    let mut dispatcher = Dispatcher::new(
        event_queue,
        task_queue,
        TargetTableRegistry::new(pool.clone()),
        ObjectBuffer::new(pool.clone()),
        TaskStore::new(pool),
        Duration::from_secs(config.dispatch.interval_secs),
        config.queue.max_batch_size,
    );

    if cli.once {
        let created = dispatcher.dispatch_once().await?;
        info!(tasks = created, "One-shot dispatch complete");
        return Ok(());
    }

    dispatcher.set_dispatch_timer().await?;
    dispatcher.event_loop().await?;

    Ok(())
}
