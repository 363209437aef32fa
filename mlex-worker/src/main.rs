//! MLEx Worker
//!
//! Executes the jobs assigned to one worker, each inside its own container.
//!
//! Architecture:
//! - Configuration: command-line flags with environment fallbacks
//! - Repository: HTTP communication with the job registry
//! - Runtime: container engine driven through its CLI
//! - Services: log forwarding and asset discovery
//! - Scheduler: job claiming and lifecycle management
//!
//! The worker claims jobs one at a time, streams their logs back while they
//! run, reports one terminal status per job and exits once its job list is
//! exhausted.

mod config;
mod error;
mod repository;
mod runtime;
mod scheduler;
mod service;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use mlex_client::RegistryClient;
use mlex_core::domain::worker::Worker;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::repository::{HttpRegistry, Registry};
use crate::runtime::{CliEngine, ContainerRuntime};
use crate::scheduler::JobController;

#[derive(Parser)]
#[command(name = "mlex-worker")]
#[command(about = "Runs the container jobs of one MLEx worker", long_about = None)]
struct Cli {
    /// Worker descriptor as JSON: {"uid", "jobs_list", "requirements"}
    #[arg(required_unless_present = "worker_uid", conflicts_with = "worker_uid")]
    descriptor: Option<String>,

    /// Load the worker descriptor from the registry instead
    #[arg(long)]
    worker_uid: Option<String>,

    /// Registry base URL including the API prefix
    #[arg(
        long,
        env = "MLEX_REGISTRY_URL",
        default_value = "http://job-service:8080/api/v0"
    )]
    registry_url: String,

    /// Container engine binary
    #[arg(long, env = "MLEX_CONTAINER_ENGINE", default_value = "docker")]
    engine: String,

    /// Seconds between two polls of a running job
    #[arg(long, env = "MLEX_POLL_INTERVAL", default_value_t = 1)]
    poll_interval: u64,

    /// Seconds to wait when no job is queued
    #[arg(long, env = "MLEX_IDLE_INTERVAL", default_value_t = 1)]
    idle_interval: u64,

    /// Registry request timeout in seconds
    #[arg(long, env = "MLEX_HTTP_TIMEOUT", default_value_t = 30)]
    http_timeout: u64,

    #[arg(long, env = "MLEX_LAUNCH_ATTEMPTS", default_value_t = 3)]
    launch_attempts: u32,

    #[arg(long, env = "MLEX_REPORT_ATTEMPTS", default_value_t = 5)]
    report_attempts: u32,

    /// Directory for files copied out of containers (default: system temp dir)
    #[arg(long, env = "MLEX_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Leave finished containers in place
    #[arg(long, env = "MLEX_KEEP_CONTAINERS")]
    keep_containers: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            registry_url: self.registry_url.clone(),
            engine: self.engine.clone(),
            poll_interval: Duration::from_secs(self.poll_interval),
            idle_interval: Duration::from_secs(self.idle_interval),
            http_timeout: Duration::from_secs(self.http_timeout),
            launch_attempts: self.launch_attempts,
            report_attempts: self.report_attempts,
            scratch_dir: self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir),
            remove_containers: !self.keep_containers,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mlex_worker=info,mlex_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Starting MLEx worker");

    let config = cli.config();
    config.validate()?;
    info!(
        "Loaded configuration: registry_url={}, engine={}",
        config.registry_url, config.engine
    );

    // Initialize registry client
    let client = RegistryClient::with_timeout(config.registry_url.clone(), config.http_timeout)
        .context("Failed to build registry client")?;
    let registry: Arc<dyn Registry> = Arc::new(HttpRegistry::new(client));

    // Initialize container engine
    let engine = CliEngine::new(config.engine.clone(), config.scratch_dir.clone());
    let version = engine
        .check_available()
        .await
        .with_context(|| format!("Container engine '{}' is not usable", config.engine))?;
    info!("Using container engine: {}", version);
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(engine);

    let worker = match (&cli.descriptor, &cli.worker_uid) {
        (Some(descriptor), _) => {
            Worker::from_descriptor(descriptor).map_err(anyhow::Error::msg)?
        }
        (None, Some(worker_uid)) => fetch_worker_with_retry(registry.as_ref(), worker_uid).await?,
        (None, None) => anyhow::bail!("either a worker descriptor or --worker-uid is required"),
    };
    worker
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid worker descriptor")?;

    info!(
        "Worker {} loaded: {} job(s), {} processor(s), gpus {:?}",
        worker.uid,
        worker.jobs_list.len(),
        worker.requirements.num_processors,
        worker.requirements.gpu_ids
    );

    let controller = JobController::new(config, registry, runtime);

    match controller.run(worker).await {
        Ok(resolved) => {
            info!("Worker finished, {} job(s) resolved", resolved);
            Ok(())
        }
        Err(e) => {
            error!("Worker stopped: {}", e);
            Err(e.into())
        }
    }
}

/// Fetches the worker descriptor with retry logic and exponential backoff
///
/// The registry may not be ready yet when the worker starts, which is common
/// when both are scheduled together.
async fn fetch_worker_with_retry(registry: &dyn Registry, worker_uid: &str) -> Result<Worker> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match registry.fetch_worker(worker_uid).await {
            Ok(worker) => {
                if attempt > 1 {
                    info!(
                        "Fetched worker {} after {} attempt(s)",
                        worker_uid, attempt
                    );
                }
                return Ok(worker);
            }
            Err(e) if e.is_not_found() => {
                return Err(anyhow::anyhow!("Worker {} does not exist: {}", worker_uid, e));
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Failed to fetch worker after {} attempts", MAX_RETRIES);
                    return Err(anyhow::anyhow!(
                        "Failed to fetch worker {} from registry: {}",
                        worker_uid,
                        e
                    ));
                }

                warn!(
                    "Failed to fetch worker (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
