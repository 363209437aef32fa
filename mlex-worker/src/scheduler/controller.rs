//! Job controller
//!
//! Drains a worker's job list one job at a time. Each job is launched as a
//! container, polled until it stops or the registry sets its terminate flag,
//! and then gets exactly one terminal status. Nothing runs concurrently: a job
//! is fully resolved before the next one is claimed.

use mlex_core::domain::job::{Job, Status};
use mlex_core::domain::worker::{Requirements, Worker};
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Fault, Result, WorkerError, classify};
use crate::repository::Registry;
use crate::runtime::{ContainerHandle, ContainerRuntime, ExitStatus};
use crate::scheduler::launch::launch_spec;
use crate::scheduler::outcome::Outcome;
use crate::service::{LogStreamer, collect_assets};

/// First delay before re-sending an unreachable terminal status
const REPORT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound of the terminal status backoff
const REPORT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Result of one poll of a running job
enum Tick {
    Active,
    Exited,
    TerminateRequested,
}

/// Drives jobs from claim to terminal status
pub struct JobController {
    config: Config,
    registry: Arc<dyn Registry>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl JobController {
    /// Creates a new job controller
    pub fn new(
        config: Config,
        registry: Arc<dyn Registry>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            config,
            registry,
            runtime,
        }
    }

    /// Claims and resolves jobs until the worker's job list is empty
    ///
    /// # Returns
    /// Number of jobs resolved
    pub async fn run(&self, mut worker: Worker) -> Result<usize> {
        info!(
            "Starting job loop for worker {} ({} job(s), poll interval {:?})",
            worker.uid,
            worker.jobs_list.len(),
            self.config.poll_interval
        );

        let mut resolved = 0;

        while !worker.jobs_list.is_empty() {
            let job = match self.registry.claim_next_job(&worker.uid).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    debug!("No job queued for worker {}", worker.uid);
                    time::sleep(self.config.idle_interval).await;
                    continue;
                }
                Err(e) => {
                    let err = WorkerError::from(e);
                    match classify(&err) {
                        Fault::NotFound => return Err(err),
                        Fault::Transport => warn!("Transient fault while claiming a job: {}", err),
                        Fault::Fatal => error!("Failed to claim a job: {}", err),
                    }
                    time::sleep(self.config.idle_interval).await;
                    continue;
                }
            };

            match worker.jobs_list.iter().position(|uid| *uid == job.uid) {
                Some(idx) => {
                    worker.jobs_list.remove(idx);
                }
                None => warn!(
                    "Job {} is not in the job list of worker {}",
                    job.uid, worker.uid
                ),
            }

            self.process_job(&worker.requirements, job).await;
            resolved += 1;
        }

        info!(
            "Job list of worker {} exhausted after {} job(s)",
            worker.uid, resolved
        );
        Ok(resolved)
    }

    /// Runs one claimed job through launch, monitoring and terminal report
    pub async fn process_job(&self, requirements: &Requirements, job: Job) -> Outcome {
        info!(job_uid = %job.uid, image = %job.job_kwargs.image, "Executing job");

        let launched = self.launch(requirements, &job).await;
        let outcome = match &launched {
            Ok(handle) => {
                self.publish_ports(&job.uid, handle).await;
                self.monitor(&job, handle).await
            }
            Err(outcome) => outcome.clone(),
        };

        self.finish(&job.uid, &outcome).await;

        if let Ok(handle) = &launched {
            self.release(&job.uid, handle, &outcome).await;
        }
        outcome
    }

    // =============================================================================
    // Launching
    // =============================================================================

    async fn launch(
        &self,
        requirements: &Requirements,
        job: &Job,
    ) -> std::result::Result<ContainerHandle, Outcome> {
        let spec = match launch_spec(job, requirements) {
            Ok(spec) => spec,
            Err(err) => {
                error!(job_uid = %job.uid, "Job cannot be launched: {}", err);
                return Err(Outcome::launch_fault(err.to_string()));
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            let err = match self.runtime.run(&spec).await {
                Ok(handle) => {
                    info!(job_uid = %job.uid, container = %handle, "Job container started");
                    return Ok(handle);
                }
                Err(e) => WorkerError::from(e),
            };

            if classify(&err) == Fault::Transport && attempt < self.config.launch_attempts {
                warn!(
                    job_uid = %job.uid,
                    "Launch attempt {}/{} hit a transient fault: {}",
                    attempt, self.config.launch_attempts, err
                );

                // The dropped call may still have created the container
                self.discard_stale(&spec.name).await;

                time::sleep(self.config.poll_interval).await;
                continue;
            }

            error!(job_uid = %job.uid, "Job failed to launch: {}", err);
            if self.config.remove_containers {
                // `run -d` creates the container before starting it
                self.discard_stale(&spec.name).await;
            }
            return Err(Outcome::launch_fault(err.to_string()));
        }
    }

    /// Force-removes whatever a failed `run` left under the job's name
    async fn discard_stale(&self, name: &str) {
        let stale = ContainerHandle::new(name);
        if let Err(e) = self.runtime.remove(&stale).await {
            debug!("No stale container {} to remove: {}", stale, e);
        }
    }

    async fn publish_ports(&self, job_uid: &str, handle: &ContainerHandle) {
        let ports = match self.runtime.port_mapping(handle).await {
            Ok(ports) => ports,
            Err(e) => {
                warn!(job_uid = %job_uid, "Failed to read port mapping of {}: {}", handle, e);
                return;
            }
        };

        match self.registry.report_port_mapping(job_uid, &ports).await {
            Ok(()) => info!(job_uid = %job_uid, "Update job {} with ports {:?}", job_uid, ports),
            Err(e) => warn!(job_uid = %job_uid, "Failed to report port mapping: {}", e),
        }
    }

    // =============================================================================
    // Monitoring
    // =============================================================================

    async fn monitor(&self, job: &Job, handle: &ContainerHandle) -> Outcome {
        let mut streamer = LogStreamer::new(job.uid.clone());

        loop {
            match self.poll(&job.uid, handle, &mut streamer).await {
                Ok(Tick::Active) => {}
                Ok(Tick::Exited) => break,
                Ok(Tick::TerminateRequested) => {
                    return self.terminate(&job.uid, handle, &mut streamer).await;
                }
                Err(err) => match classify(&err) {
                    Fault::Transport => warn!(
                        job_uid = %job.uid,
                        "Transient fault while monitoring job, retrying: {}", err
                    ),
                    Fault::NotFound => return self.abandon(&job.uid, handle, err).await,
                    Fault::Fatal => {
                        return self.fail_running(&job.uid, handle, &mut streamer, err).await;
                    }
                },
            }

            time::sleep(self.config.poll_interval).await;
        }

        self.conclude(job, handle, &mut streamer).await
    }

    /// One poll tick: container state, terminate flag, then new log output
    async fn poll(
        &self,
        job_uid: &str,
        handle: &ContainerHandle,
        streamer: &mut LogStreamer,
    ) -> Result<Tick> {
        let status = self.runtime.inspect(handle).await?;
        if !status.is_active() {
            debug!("Container {} is no longer running: {:?}", handle, status);
            return Ok(Tick::Exited);
        }

        let job = self.registry.fetch_job(job_uid).await?;
        if job.terminate_requested() {
            return Ok(Tick::TerminateRequested);
        }

        self.forward_logs(handle, streamer).await?;
        Ok(Tick::Active)
    }

    async fn forward_logs(&self, handle: &ContainerHandle, streamer: &mut LogStreamer) -> Result<usize> {
        let logs = self.runtime.logs(handle).await?;
        Ok(streamer.forward(self.registry.as_ref(), &logs).await?)
    }

    /// Sends whatever log output is still unsent, retrying dropped connections
    async fn flush_logs(&self, job_uid: &str, handle: &ContainerHandle, streamer: &mut LogStreamer) {
        for attempt in 1..=self.config.report_attempts {
            match self.forward_logs(handle, streamer).await {
                Ok(_) => {
                    debug!(
                        "Final log flush of job {} done at {} bytes",
                        job_uid,
                        streamer.cursor().bytes_sent
                    );
                    return;
                }
                Err(err)
                    if classify(&err) == Fault::Transport
                        && attempt < self.config.report_attempts =>
                {
                    warn!(job_uid = %job_uid, "Final log flush interrupted, retrying: {}", err);
                    time::sleep(self.config.poll_interval).await;
                }
                Err(err) => {
                    warn!(job_uid = %job_uid, "Final log flush failed: {}", err);
                    return;
                }
            }
        }
    }

    // =============================================================================
    // Terminal transitions
    // =============================================================================

    async fn terminate(
        &self,
        job_uid: &str,
        handle: &ContainerHandle,
        streamer: &mut LogStreamer,
    ) -> Outcome {
        info!(job_uid = %job_uid, "Termination requested, killing container {}", handle);

        if let Err(e) = self.runtime.kill(handle).await {
            warn!(job_uid = %job_uid, "Failed to kill container {}: {}", handle, e);
        }
        self.flush_logs(job_uid, handle, streamer).await;

        Outcome::Terminated
    }

    async fn abandon(&self, job_uid: &str, handle: &ContainerHandle, err: WorkerError) -> Outcome {
        if let Err(e) = self.runtime.kill(handle).await {
            debug!("Failed to kill container {}: {}", handle, e);
        }

        Outcome::Abandoned {
            reason: format!("job {} is gone from the registry: {}", job_uid, err),
        }
    }

    async fn fail_running(
        &self,
        job_uid: &str,
        handle: &ContainerHandle,
        streamer: &mut LogStreamer,
        err: WorkerError,
    ) -> Outcome {
        error!(job_uid = %job_uid, "Monitoring job failed: {}", err);

        if let Err(e) = self.runtime.kill(handle).await {
            debug!("Failed to kill container {}: {}", handle, e);
        }
        self.flush_logs(job_uid, handle, streamer).await;

        Outcome::runtime_fault(err.to_string())
    }

    /// Exit path: final logs, assets, then the outcome of the exit code
    async fn conclude(&self, job: &Job, handle: &ContainerHandle, streamer: &mut LogStreamer) -> Outcome {
        let exit = match self.wait_for_exit(&job.uid, handle).await {
            Ok(exit) => exit,
            Err(err) => {
                error!(job_uid = %job.uid, "Failed to read exit status: {}", err);
                self.flush_logs(&job.uid, handle, streamer).await;
                return Outcome::runtime_fault(err.to_string());
            }
        };

        self.flush_logs(&job.uid, handle, streamer).await;

        if job.working_directory.is_some() {
            self.report_assets(&job.uid, handle).await;
        }

        if exit.success() {
            Outcome::Complete
        } else {
            Outcome::runtime_fault(exit.describe())
        }
    }

    async fn wait_for_exit(&self, job_uid: &str, handle: &ContainerHandle) -> Result<ExitStatus> {
        loop {
            let err = match self.runtime.wait(handle).await {
                Ok(exit) => return Ok(exit),
                Err(e) => WorkerError::from(e),
            };

            if classify(&err) != Fault::Transport {
                return Err(err);
            }
            warn!(job_uid = %job_uid, "Transient fault while waiting for exit: {}", err);
            time::sleep(self.config.poll_interval).await;
        }
    }

    async fn report_assets(&self, job_uid: &str, handle: &ContainerHandle) {
        match collect_assets(self.runtime.as_ref(), handle).await {
            Ok(assets) if assets.is_empty() => {
                info!(job_uid = %job_uid, "Job generated no new assets");
            }
            Ok(assets) => {
                info!(job_uid = %job_uid, assets = ?assets, "Job generated new assets");
            }
            Err(e) => error!(job_uid = %job_uid, "No assets for job: {}", e),
        }
    }

    /// The only place a terminal status leaves the worker
    async fn finish(&self, job_uid: &str, outcome: &Outcome) {
        match outcome {
            Outcome::Failed { kind, return_code } => error!(
                job_uid = %job_uid,
                outcome = outcome.label(),
                fault = %kind,
                return_code = %return_code,
                "Job finished"
            ),
            Outcome::Abandoned { reason } => error!(
                job_uid = %job_uid,
                outcome = outcome.label(),
                reason = %reason,
                "Job finished"
            ),
            Outcome::Complete | Outcome::Terminated => {
                info!(job_uid = %job_uid, outcome = outcome.label(), "Job finished");
            }
        }

        if let Some(status) = outcome.status() {
            self.report_terminal(job_uid, &status).await;
        }
    }

    /// Sends a terminal status, retrying transport and gateway faults
    ///
    /// The update sets an absolute state, so a resend after a reply was lost
    /// leaves the job with the same terminal status.
    async fn report_terminal(&self, job_uid: &str, status: &Status) {
        let mut delay = REPORT_INITIAL_BACKOFF;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.registry.report_status(job_uid, Some(status), None).await {
                Ok(()) => {
                    debug!("Update job {} with status {}", job_uid, status.state);
                    return;
                }
                Err(e) => WorkerError::from(e),
            };

            if classify(&err) != Fault::Transport || attempt >= self.config.report_attempts {
                error!(
                    job_uid = %job_uid,
                    "Failed to report status {}: {}", status.state, err
                );
                return;
            }

            warn!(
                job_uid = %job_uid,
                "Failed to reach registry (attempt {}/{}): {}; retrying in {:?}",
                attempt, self.config.report_attempts, err, delay
            );
            time::sleep(delay).await;

            // Exponential backoff with cap
            delay = (delay * 2).min(REPORT_MAX_BACKOFF);
        }
    }

    async fn release(&self, job_uid: &str, handle: &ContainerHandle, outcome: &Outcome) {
        let abandoned = matches!(outcome, Outcome::Abandoned { .. });
        if !self.config.remove_containers && !abandoned {
            return;
        }

        match self.runtime.remove(handle).await {
            Ok(()) => debug!("Removed container {} of job {}", handle, job_uid),
            Err(e) => warn!(job_uid = %job_uid, "Failed to remove container {}: {}", handle, e),
        }
    }
}
