//! Container runtime layer
//!
//! A thin passthrough over a container engine. The controller only ever talks
//! to the [`ContainerRuntime`] trait, so the engine can be swapped for a test
//! double. The production implementation shells out to a Docker-compatible
//! CLI (`docker` or `podman`).

mod engine;

pub use engine::CliEngine;

use async_trait::async_trait;
use mlex_core::domain::job::HostPort;
use mlex_core::dto::job::PortMapping;
use std::collections::BTreeMap;
use thiserror::Error;

/// In-container mount point of a job's working directory
pub const WORKDIR_MOUNT: &str = "/app/work/data";

/// Directory listing written before the user command runs
pub const SNAPSHOT_BEFORE: &str = "/tmp/file_record_init.txt";

/// Directory listing written after the user command returns
pub const SNAPSHOT_AFTER: &str = "/tmp/file_record_final.txt";

/// Name of a container owned by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: String,
}

impl ContainerHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Everything the engine needs to start one job container
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    /// Container name, unique per job uid
    pub name: String,
    pub image: String,
    /// Argv passed after the image; the image entrypoint is kept
    pub command: Vec<String>,
    pub cpus: u32,
    pub gpu_request: Option<GpuRequest>,
    /// Container port to requested host port
    pub ports: BTreeMap<String, HostPort>,
    /// "<host path>:<container path>" bind mounts
    pub volume_binds: Vec<String>,
}

/// Opaque GPU device request, rendered by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuRequest {
    pub device_ids: Vec<String>,
}

/// Container state as reported by `inspect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Other(String),
}

impl ContainerStatus {
    /// Whether the job is still executing; anything else means it is over
    ///
    /// A paused or restarting container counts as over, so the controller
    /// moves on to `wait`, which blocks until the container really exits and
    /// no longer observes the terminate flag in the meantime.
    pub fn is_active(&self) -> bool {
        matches!(self, ContainerStatus::Created | ContainerStatus::Running)
    }
}

impl From<&str> for ContainerStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "removing" => ContainerStatus::Removing,
            "exited" | "stopped" => ContainerStatus::Exited,
            "dead" => ContainerStatus::Dead,
            other => ContainerStatus::Other(other.to_string()),
        }
    }
}

/// Exit result of a finished container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub exit_code: i64,
    /// Error recorded by the engine, if any
    pub error: Option<String>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Failure description reported to the registry as `return_code`
    pub fn describe(&self) -> String {
        format!(
            "Code: {} Error: {}",
            self.exit_code,
            self.error.as_deref().unwrap_or("None")
        )
    }
}

/// Errors raised by the container engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine binary could not be started
    #[error("Failed to execute '{program} {op}': {source}")]
    Spawn {
        program: String,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The engine ran but reported failure
    #[error("'{op}' failed for {target}: exit_code={code}, stderr='{stderr}'")]
    CommandFailed {
        op: &'static str,
        target: String,
        code: i32,
        stderr: String,
    },

    /// The engine succeeded but printed something unexpected
    #[error("Unexpected '{op}' output: {message}")]
    UnexpectedOutput { op: &'static str, message: String },

    /// Local file handling around the engine failed
    #[error("Local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Container engine operations used by the job controller
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates and starts a detached container
    async fn run(&self, spec: &LaunchSpec) -> Result<ContainerHandle, EngineError>;

    /// Reads the current container state
    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus, EngineError>;

    /// Reads the host ports the engine bound for published container ports
    async fn port_mapping(&self, handle: &ContainerHandle) -> Result<PortMapping, EngineError>;

    /// Returns the complete merged stdout/stderr text produced so far
    async fn logs(&self, handle: &ContainerHandle) -> Result<String, EngineError>;

    async fn kill(&self, handle: &ContainerHandle) -> Result<(), EngineError>;

    /// Blocks until the container stops and returns its exit result
    async fn wait(&self, handle: &ContainerHandle) -> Result<ExitStatus, EngineError>;

    /// Copies one file out of the container and returns its contents
    async fn copy_out(
        &self,
        handle: &ContainerHandle,
        container_path: &str,
    ) -> Result<Vec<u8>, EngineError>;

    /// Force-removes the container
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), EngineError>;
}
