//! Worker poll loop.
//!
//! Repeatedly claims the next eligible task and executes it, backing off
//! exponentially while the task backlog is empty. Termination is
//! cooperative: a signal sets a flag checked at iteration boundaries only,
//! so an in-flight execution always runs to completion and no job is left
//! abandoned mid-transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use strload_loader::Loader;
use strload_store::JobRegistry;

pub struct PollWorker {
    jobs: JobRegistry,
    loader: Loader,
    max_wait_secs: u64,
    terminating: Arc<AtomicBool>,
}

impl PollWorker {
    pub fn new(
        jobs: JobRegistry,
        loader: Loader,
        max_wait_secs: u64,
        terminating: Arc<AtomicBool>,
    ) -> Self {
        Self {
            jobs,
            loader,
            max_wait_secs,
            terminating,
        }
    }

    /// Poll until termination is requested.
    ///
    /// Claim errors are transient (the control store may flap): logged,
    /// then retried with the same backoff as an empty poll. Execution
    /// errors have already recorded the job's terminal status, so the loop
    /// only logs them and keeps going.
    pub async fn run(&self) {
        let mut consecutive_empty: u32 = 0;

        while !self.terminating.load(Ordering::Relaxed) {
            let claimed = match self.jobs.claim_next().await {
                Ok(claimed) => claimed,
                Err(e) => {
                    warn!("Claim failed: {} — backing off", e);
                    self.wait(&mut consecutive_empty).await;
                    continue;
                }
            };

            match claimed {
                Some(job) => {
                    info!(
                        task_seq = job.task_seq,
                        job_seq = job.job_seq,
                        table = %job.qualified_name(),
                        objects = job.object_urls.len(),
                        "Handling task"
                    );
                    if let Err(e) = self.loader.execute(&job).await {
                        // Terminal status already recorded by the loader.
                        error!(job_seq = job.job_seq, "Job failed: {}", e);
                    }
                    consecutive_empty = 0;
                }
                None => self.wait(&mut consecutive_empty).await,
            }
        }

        info!("shutdown gracefully");
    }

    async fn wait(&self, consecutive_empty: &mut u32) {
        let secs = backoff_secs(*consecutive_empty, self.max_wait_secs);
        if *consecutive_empty > 0 {
            info!("queue wait: sleep {}s", secs);
        }
        tokio::time::sleep(Duration::from_secs(secs)).await;
        *consecutive_empty += 1;
    }
}

/// `min(2^consecutive_empty, cap)` seconds.
pub fn backoff_secs(consecutive_empty: u32, cap: u64) -> u64 {
    1u64.checked_shl(consecutive_empty)
        .unwrap_or(u64::MAX)
        .min(cap)
}

/// Set up cooperative termination: SIGTERM/SIGINT flip the returned flag;
/// loops observe it between iterations.
pub fn spawn_signal_listener() -> Arc<AtomicBool> {
    let terminating = Arc::new(AtomicBool::new(false));

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let flag = terminating.clone();
        tokio::spawn(async move {
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    return;
                }
            };
            let mut int = match signal(SignalKind::interrupt()) {
                Ok(int) => int,
                Err(e) => {
                    warn!("Failed to install SIGINT handler: {}", e);
                    return;
                }
            };
            tokio::select! {
                _ = term.recv() => {}
                _ = int.recv() => {}
            }
            info!("Termination signal received — finishing current work");
            flag.store(true, Ordering::Relaxed);
        });
    }

    #[cfg(not(unix))]
    {
        let flag = terminating.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received — finishing current work");
                flag.store(true, Ordering::Relaxed);
            }
        });
    }

    terminating
}
