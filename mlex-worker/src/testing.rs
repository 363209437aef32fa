//! In-memory doubles of the registry and the container engine

use async_trait::async_trait;
use mlex_client::ClientError;
use mlex_core::domain::job::{Job, JobCommand, JobKwargs, Status};
use mlex_core::domain::worker::{Requirements, Worker};
use mlex_core::dto::job::{PortBinding, PortMapping};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::repository::Registry;
use crate::runtime::{
    ContainerHandle, ContainerRuntime, ContainerStatus, EngineError, ExitStatus, LaunchSpec,
    SNAPSHOT_AFTER, SNAPSHOT_BEFORE,
};

pub fn job(uid: &str, image: &str) -> Job {
    Job {
        uid: uid.to_string(),
        job_kwargs: JobKwargs {
            image: image.to_string(),
            command: JobCommand::Shell("python3 main.py".to_string()),
            port_map: None,
        },
        working_directory: None,
        terminate: None,
        status: Status::default(),
    }
}

pub fn worker(uid: &str, jobs: &[&str]) -> Worker {
    Worker {
        uid: uid.to_string(),
        jobs_list: jobs.iter().map(|j| j.to_string()).collect(),
        requirements: Requirements::default(),
    }
}

// =============================================================================
// Registry
// =============================================================================

/// One request received by the fake registry, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Logs { job_uid: String, frame: String },
    Status { job_uid: String, status: Status },
    Ports { job_uid: String, ports: PortMapping },
}

/// Failure injected into one status send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFault {
    /// Never connected
    Connect,
    /// Pooled connection dropped mid-request
    Reset,
    /// 503 from a restarting registry
    Unavailable,
    /// 422, the registry refuses the update
    Rejected,
}

impl SendFault {
    fn error(self) -> ClientError {
        match self {
            SendFault::Connect => ClientError::transport("tcp connect error", true),
            SendFault::Reset => connection_reset(),
            SendFault::Unavailable => ClientError::api_error(503, "Service Unavailable"),
            SendFault::Rejected => ClientError::api_error(422, "invalid state transition"),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    queue: VecDeque<Job>,
    jobs: HashMap<String, Job>,
    workers: HashMap<String, Worker>,
    missing: HashSet<String>,
    fetches: HashMap<String, usize>,
    terminate_after: HashMap<String, usize>,
    updates: Vec<Update>,
    log_attempts: usize,
    log_failures: (usize, usize),
    status_faults: VecDeque<SendFault>,
    claim_failures: usize,
    fetch_failures: usize,
}

pub struct FakeRegistry {
    state: Mutex<RegistryState>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Queues a job for claiming and makes it fetchable
    pub fn enqueue(&self, job: Job) {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(job.uid.clone(), job.clone());
        state.queue.push_back(job);
    }

    pub fn add_worker(&self, worker: Worker) {
        let mut state = self.state.lock().unwrap();
        state.workers.insert(worker.uid.clone(), worker);
    }

    /// The job reads as terminate=true from its `count`-th fetch on
    pub fn terminate_after(&self, job_uid: &str, count: usize) {
        let mut state = self.state.lock().unwrap();
        state.terminate_after.insert(job_uid.to_string(), count);
    }

    /// Fetching the job returns NotFound
    pub fn delete_job(&self, job_uid: &str) {
        let mut state = self.state.lock().unwrap();
        state.missing.insert(job_uid.to_string());
    }

    /// Log sends `skip..skip + count` fail with a reset connection
    pub fn fail_log_sends(&self, skip: usize, count: usize) {
        let mut state = self.state.lock().unwrap();
        state.log_failures = (state.log_attempts + skip, count);
    }

    /// The next `count` status reports fail before connecting
    pub fn fail_status_connects(&self, count: usize) {
        for _ in 0..count {
            self.fail_status_send(SendFault::Connect);
        }
    }

    /// Queues one failure for the next status report
    pub fn fail_status_send(&self, fault: SendFault) {
        self.state.lock().unwrap().status_faults.push_back(fault);
    }

    /// The next `count` claims fail with a reset connection
    pub fn fail_claims(&self, count: usize) {
        self.state.lock().unwrap().claim_failures = count;
    }

    /// The next `count` job fetches fail with a reset connection
    pub fn fail_fetches(&self, count: usize) {
        self.state.lock().unwrap().fetch_failures = count;
    }

    pub fn updates(&self) -> Vec<Update> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn updates_for(&self, job_uid: &str) -> Vec<Update> {
        self.updates()
            .into_iter()
            .filter(|update| match update {
                Update::Logs { job_uid: uid, .. }
                | Update::Status { job_uid: uid, .. }
                | Update::Ports { job_uid: uid, .. } => uid == job_uid,
            })
            .collect()
    }

    pub fn log_frames(&self, job_uid: &str) -> Vec<String> {
        self.updates_for(job_uid)
            .into_iter()
            .filter_map(|update| match update {
                Update::Logs { frame, .. } => Some(frame),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self, job_uid: &str) -> Vec<Status> {
        self.updates_for(job_uid)
            .into_iter()
            .filter_map(|update| match update {
                Update::Status { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn fetch_count(&self, job_uid: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.fetches.get(job_uid).copied().unwrap_or(0)
    }
}

fn connection_reset() -> ClientError {
    ClientError::transport(
        "error sending request: connection reset by peer",
        false,
    )
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn fetch_worker(&self, worker_uid: &str) -> Result<Worker, ClientError> {
        let state = self.state.lock().unwrap();
        state
            .workers
            .get(worker_uid)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("workers/{}", worker_uid)))
    }

    async fn fetch_job(&self, job_uid: &str) -> Result<Job, ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.fetch_failures > 0 {
            state.fetch_failures -= 1;
            return Err(connection_reset());
        }
        if state.missing.contains(job_uid) {
            return Err(ClientError::NotFound(format!("jobs/{}", job_uid)));
        }

        let count = {
            let count = state.fetches.entry(job_uid.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let terminate = state
            .terminate_after
            .get(job_uid)
            .is_some_and(|after| count >= *after);

        let mut job = state
            .jobs
            .get(job_uid)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("jobs/{}", job_uid)))?;
        if terminate {
            job.terminate = Some(true);
        }
        Ok(job)
    }

    async fn claim_next_job(&self, _worker_uid: &str) -> Result<Option<Job>, ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.claim_failures > 0 {
            state.claim_failures -= 1;
            return Err(connection_reset());
        }
        Ok(state.queue.pop_front())
    }

    async fn report_status(
        &self,
        job_uid: &str,
        status: Option<&Status>,
        logs: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();

        if let Some(status) = status {
            if let Some(fault) = state.status_faults.pop_front() {
                return Err(fault.error());
            }
            state.updates.push(Update::Status {
                job_uid: job_uid.to_string(),
                status: status.clone(),
            });
        }

        if let Some(frame) = logs {
            let attempt = state.log_attempts;
            state.log_attempts += 1;
            let (from, count) = state.log_failures;
            if attempt >= from && attempt < from + count {
                return Err(connection_reset());
            }
            state.updates.push(Update::Logs {
                job_uid: job_uid.to_string(),
                frame: frame.to_string(),
            });
        }

        Ok(())
    }

    async fn report_port_mapping(
        &self,
        job_uid: &str,
        ports: &PortMapping,
    ) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.updates.push(Update::Ports {
            job_uid: job_uid.to_string(),
            ports: ports.clone(),
        });
        Ok(())
    }
}

// =============================================================================
// Container engine
// =============================================================================

/// Scripted behaviour of every container started from one image
#[derive(Debug, Clone, Default)]
pub struct ContainerScript {
    /// Log text appended on each inspect while running; the rest on exit
    pub log_chunks: Vec<String>,
    /// Number of inspects answering "running" before the container exits
    pub running_ticks: usize,
    pub exit_code: i64,
    pub exit_error: Option<String>,
    /// `run` creates the container, then fails to start it with this stderr
    pub run_error: Option<String>,
    /// Number of leading `run` calls failing with a reset connection
    pub transient_run_failures: usize,
    /// Number of leading `logs` calls failing with a reset connection
    pub transient_log_failures: usize,
    /// Every `logs` call fails with this stderr
    pub fatal_log_error: Option<String>,
    /// Listing contents copied from SNAPSHOT_BEFORE and SNAPSHOT_AFTER
    pub snapshots: Option<(String, String)>,
}

impl ContainerScript {
    pub fn exits_with(exit_code: i64) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    pub fn running_for(mut self, ticks: usize) -> Self {
        self.running_ticks = ticks;
        self
    }

    pub fn logs(mut self, chunks: &[&str]) -> Self {
        self.log_chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone)]
struct ContainerState {
    script: ContainerScript,
    inspects: usize,
    chunks_emitted: usize,
    logs: String,
    logs_calls: usize,
    killed: bool,
    removed: bool,
}

impl ContainerState {
    fn emit_until(&mut self, chunks: usize) {
        let chunks = chunks.min(self.script.log_chunks.len());
        while self.chunks_emitted < chunks {
            let chunk = self.script.log_chunks[self.chunks_emitted].clone();
            self.logs.push_str(&chunk);
            self.chunks_emitted += 1;
        }
    }
}

#[derive(Default)]
struct RuntimeState {
    scripts: HashMap<String, ContainerScript>,
    run_attempts: HashMap<String, usize>,
    containers: HashMap<String, ContainerState>,
    launched: Vec<LaunchSpec>,
    calls: Vec<String>,
}

pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RuntimeState::default()),
        }
    }

    /// Containers started from `image` follow `script`
    pub fn script(&self, image: &str, script: ContainerScript) {
        let mut state = self.state.lock().unwrap();
        state.scripts.insert(image.to_string(), script);
    }

    /// Every engine call as "<op> <container>"
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.state.lock().unwrap().launched.clone()
    }

    pub fn was_killed(&self, name: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.containers.get(name).is_some_and(|c| c.killed)
    }

    pub fn was_removed(&self, name: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.containers.get(name).is_some_and(|c| c.removed)
    }

    /// Full log text the engine holds for a container
    pub fn log_text(&self, name: &str) -> String {
        let state = self.state.lock().unwrap();
        state
            .containers
            .get(name)
            .map(|c| c.logs.clone())
            .unwrap_or_default()
    }
}

fn engine_failure(op: &'static str, target: &str, stderr: &str) -> EngineError {
    EngineError::CommandFailed {
        op,
        target: target.to_string(),
        code: 1,
        stderr: stderr.to_string(),
    }
}

fn no_such_container(op: &'static str, name: &str) -> EngineError {
    engine_failure(op, name, &format!("Error: No such container: {}", name))
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run(&self, spec: &LaunchSpec) -> Result<ContainerHandle, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("run {}", spec.name));

        let script = state
            .scripts
            .get(&spec.image)
            .cloned()
            .ok_or_else(|| {
                engine_failure(
                    "run",
                    &spec.image,
                    &format!(
                        "Unable to find image '{}' locally: pull access denied",
                        spec.image
                    ),
                )
            })?;

        let attempts = state.run_attempts.entry(spec.image.clone()).or_insert(0);
        *attempts += 1;
        if *attempts <= script.transient_run_failures {
            return Err(engine_failure(
                "run",
                &spec.image,
                "error during connect: connection reset by peer",
            ));
        }
        if state
            .containers
            .get(&spec.name)
            .is_some_and(|c| !c.removed)
        {
            return Err(engine_failure(
                "run",
                &spec.image,
                &format!("Conflict. The container name \"/{}\" is already in use", spec.name),
            ));
        }

        let run_error = script.run_error.clone();
        state.containers.insert(
            spec.name.clone(),
            ContainerState {
                script,
                inspects: 0,
                chunks_emitted: 0,
                logs: String::new(),
                logs_calls: 0,
                killed: false,
                removed: false,
            },
        );
        if let Some(stderr) = run_error {
            return Err(engine_failure("run", &spec.image, &stderr));
        }

        state.launched.push(spec.clone());
        Ok(ContainerHandle::new(spec.name.clone()))
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("inspect {}", handle));
        let container = state
            .containers
            .get_mut(&handle.name)
            .filter(|c| !c.removed)
            .ok_or_else(|| no_such_container("inspect", &handle.name))?;

        if container.killed {
            return Ok(ContainerStatus::Exited);
        }
        container.inspects += 1;
        if container.inspects <= container.script.running_ticks {
            let inspects = container.inspects;
            container.emit_until(inspects);
            Ok(ContainerStatus::Running)
        } else {
            let all = container.script.log_chunks.len();
            container.emit_until(all);
            Ok(ContainerStatus::Exited)
        }
    }

    async fn port_mapping(&self, handle: &ContainerHandle) -> Result<PortMapping, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("ports {}", handle));
        let mut ports = PortMapping::new();
        ports.insert(
            "8050/tcp".to_string(),
            Some(vec![PortBinding {
                host_ip: "0.0.0.0".to_string(),
                host_port: "49153".to_string(),
            }]),
        );
        Ok(ports)
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<String, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("logs {}", handle));
        let container = state
            .containers
            .get_mut(&handle.name)
            .filter(|c| !c.removed)
            .ok_or_else(|| no_such_container("logs", &handle.name))?;

        container.logs_calls += 1;
        if container.logs_calls <= container.script.transient_log_failures {
            return Err(engine_failure(
                "logs",
                &handle.name,
                "read unix @->/var/run/docker.sock: read: connection reset by peer",
            ));
        }
        if let Some(stderr) = &container.script.fatal_log_error {
            return Err(engine_failure("logs", &handle.name, stderr));
        }
        Ok(container.logs.clone())
    }

    async fn kill(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("kill {}", handle));
        let container = state
            .containers
            .get_mut(&handle.name)
            .filter(|c| !c.removed)
            .ok_or_else(|| no_such_container("kill", &handle.name))?;
        container.killed = true;
        Ok(())
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<ExitStatus, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("wait {}", handle));
        let container = state
            .containers
            .get(&handle.name)
            .filter(|c| !c.removed)
            .ok_or_else(|| no_such_container("wait", &handle.name))?;

        if container.killed {
            return Ok(ExitStatus {
                exit_code: 137,
                error: None,
            });
        }
        Ok(ExitStatus {
            exit_code: container.script.exit_code,
            error: container.script.exit_error.clone(),
        })
    }

    async fn copy_out(
        &self,
        handle: &ContainerHandle,
        container_path: &str,
    ) -> Result<Vec<u8>, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("cp {}", handle));
        let container = state
            .containers
            .get(&handle.name)
            .filter(|c| !c.removed)
            .ok_or_else(|| no_such_container("cp", &handle.name))?;

        let missing = || {
            engine_failure(
                "cp",
                &handle.name,
                &format!("Could not find the file {} in container", container_path),
            )
        };
        let (before, after) = container.script.snapshots.as_ref().ok_or_else(missing)?;
        match container_path {
            SNAPSHOT_BEFORE => Ok(before.as_bytes().to_vec()),
            SNAPSHOT_AFTER => Ok(after.as_bytes().to_vec()),
            _ => Err(missing()),
        }
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("rm {}", handle));
        let container = state
            .containers
            .get_mut(&handle.name)
            .ok_or_else(|| no_such_container("rm", &handle.name))?;
        container.removed = true;
        Ok(())
    }
}
