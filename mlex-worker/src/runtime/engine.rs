//! Docker-compatible CLI engine
//!
//! Drives job containers through the `docker` or `podman` binary:
//! - Checking the engine is available
//! - Starting detached job containers with resource limits
//! - Reading state, ports, logs and exit results
//! - Copying snapshot files out and removing containers

use async_trait::async_trait;
use mlex_core::domain::job::HostPort;
use mlex_core::dto::job::PortMapping;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ContainerHandle, ContainerRuntime, ContainerStatus, EngineError, ExitStatus, LaunchSpec,
};

/// Container engine reached through its command-line client
pub struct CliEngine {
    /// Engine binary, e.g. "docker" or "podman"
    program: String,

    /// Local directory receiving files copied out of containers
    scratch_dir: PathBuf,
}

impl CliEngine {
    /// Creates a new CLI engine
    ///
    /// # Arguments
    /// * `program` - Engine binary name or path
    /// * `scratch_dir` - Where `copy_out` stages files before reading them
    pub fn new(program: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Checks the engine binary is installed and answering
    pub async fn check_available(&self) -> Result<String, EngineError> {
        let output = self.exec("--version", &self.program, &["--version".to_string()]).await?;
        let version = output.trim().to_string();
        info!("Container engine is available: {}", version);
        Ok(version)
    }

    fn is_podman(&self) -> bool {
        Path::new(&self.program)
            .file_name()
            .map(|name| name.to_string_lossy().starts_with("podman"))
            .unwrap_or(false)
    }

    /// Builds the `run` argument list for a launch spec
    fn run_args(&self, spec: &LaunchSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(), // Detached
            "--name".to_string(),
            spec.name.clone(),
            "--cpus".to_string(),
            spec.cpus.to_string(),
        ];

        if let Some(gpus) = &spec.gpu_request {
            if self.is_podman() {
                // CDI device names
                for id in &gpus.device_ids {
                    args.push("--device".to_string());
                    args.push(format!("nvidia.com/gpu={}", id));
                }
            } else {
                // Quoted so the CSV parser keeps the id list in one field
                args.push("--gpus".to_string());
                args.push(format!("\"device={}\"", gpus.device_ids.join(",")));
            }
        }

        for (container_port, host_port) in &spec.ports {
            args.push("-p".to_string());
            match host_port {
                HostPort::Auto => args.push(container_port.clone()),
                HostPort::Fixed(port) => args.push(format!("{}:{}", port, container_port)),
            }
        }

        for bind in &spec.volume_binds {
            args.push("-v".to_string());
            args.push(bind.clone());
        }

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }

    /// Runs one engine command and returns its stdout
    async fn exec(&self, op: &'static str, target: &str, args: &[String]) -> Result<String, EngineError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                op,
                source,
            })?;

        check_output(op, target, output).map(|stdout| String::from_utf8_lossy(&stdout).to_string())
    }

    /// Reads one field of `inspect` through a Go template
    async fn inspect_field(&self, handle: &ContainerHandle, template: &str) -> Result<String, EngineError> {
        self.exec(
            "inspect",
            &handle.name,
            &[
                "inspect".to_string(),
                "--format".to_string(),
                template.to_string(),
                handle.name.clone(),
            ],
        )
        .await
    }
}

#[async_trait]
impl ContainerRuntime for CliEngine {
    async fn run(&self, spec: &LaunchSpec) -> Result<ContainerHandle, EngineError> {
        info!("Creating container {} for image {}", spec.name, spec.image);

        let stdout = self.exec("run", &spec.image, &self.run_args(spec)).await?;
        let container_id = stdout.trim();

        info!(
            "Container {} started successfully with ID: {}",
            spec.name, container_id
        );
        Ok(ContainerHandle::new(spec.name.clone()))
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus, EngineError> {
        let state = self.inspect_field(handle, "{{.State.Status}}").await?;
        Ok(ContainerStatus::from(state.as_str()))
    }

    async fn port_mapping(&self, handle: &ContainerHandle) -> Result<PortMapping, EngineError> {
        let json = self
            .inspect_field(handle, "{{json .NetworkSettings.Ports}}")
            .await?;
        parse_port_mapping(&json)
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<String, EngineError> {
        // `logs` writes the container's stderr to its own stderr; merge the
        // two so the text only ever grows at the end.
        let output = Command::new("sh")
            .arg("-c")
            .arg("exec \"$0\" logs \"$1\" 2>&1")
            .arg(&self.program)
            .arg(&handle.name)
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: self.program.clone(),
                op: "logs",
                source,
            })?;

        check_output("logs", &handle.name, output).map(|stdout| decode_log_text(&stdout))
    }

    async fn kill(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        self.exec("kill", &handle.name, &["kill".to_string(), handle.name.clone()])
            .await?;
        info!("Container {} killed", handle);
        Ok(())
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<ExitStatus, EngineError> {
        let stdout = self
            .exec("wait", &handle.name, &["wait".to_string(), handle.name.clone()])
            .await?;
        let exit_code = stdout
            .trim()
            .lines()
            .last()
            .unwrap_or_default()
            .trim()
            .parse::<i64>()
            .map_err(|e| EngineError::UnexpectedOutput {
                op: "wait",
                message: format!("'{}' is not an exit code: {}", stdout.trim(), e),
            })?;

        let error = self.inspect_field(handle, "{{.State.Error}}").await?;
        let error = Some(error.trim().to_string()).filter(|e| !e.is_empty());

        debug!("Container {} exited with code {}", handle, exit_code);
        Ok(ExitStatus { exit_code, error })
    }

    async fn copy_out(
        &self,
        handle: &ContainerHandle,
        container_path: &str,
    ) -> Result<Vec<u8>, EngineError> {
        let file_name = Path::new(container_path)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "copy".to_string());
        let local = self
            .scratch_dir
            .join(format!("mlex-{}-{}", Uuid::new_v4(), file_name));

        self.exec(
            "cp",
            &handle.name,
            &[
                "cp".to_string(),
                format!("{}:{}", handle.name, container_path),
                local.to_string_lossy().to_string(),
            ],
        )
        .await?;

        let contents = tokio::fs::read(&local).await;
        if let Err(e) = tokio::fs::remove_file(&local).await {
            debug!("Failed to remove scratch file {}: {}", local.display(), e);
        }
        Ok(contents?)
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        self.exec(
            "rm",
            &handle.name,
            &["rm".to_string(), "-f".to_string(), handle.name.clone()],
        )
        .await?;
        debug!("Container {} removed", handle);
        Ok(())
    }
}

/// Turns a non-zero engine exit into an error, keeping stderr for diagnosis
fn check_output(op: &'static str, target: &str, output: Output) -> Result<Vec<u8>, EngineError> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        debug!("{} {} stderr: {}", op, target, stderr.trim());
    }

    if !output.status.success() {
        return Err(EngineError::CommandFailed {
            op,
            target: target.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(output.stdout)
}

/// Decodes log bytes, holding back a multi-byte character cut at the end
///
/// The next read returns the complete character, so the text seen by the log
/// cursor stays a prefix of every later read. Invalid bytes earlier in the
/// log are replaced the same way on every read.
fn decode_log_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(&bytes[..complete_len(bytes)]).into_owned()
}

/// Length of `bytes` without an incomplete trailing UTF-8 sequence
fn complete_len(bytes: &[u8]) -> usize {
    // A cut sequence has at most 3 of its 4 bytes
    let floor = bytes.len().saturating_sub(3);
    let lead = (floor..bytes.len())
        .rev()
        .find(|&idx| bytes[idx] & 0xC0 != 0x80);

    match lead {
        Some(idx) => match std::str::from_utf8(&bytes[idx..]) {
            Err(e) if e.error_len().is_none() => idx,
            _ => bytes.len(),
        },
        None => bytes.len(),
    }
}

fn parse_port_mapping(json: &str) -> Result<PortMapping, EngineError> {
    serde_json::from_str::<Option<PortMapping>>(json.trim())
        .map(Option::unwrap_or_default)
        .map_err(|e| EngineError::UnexpectedOutput {
            op: "inspect",
            message: format!("invalid port mapping '{}': {}", json.trim(), e),
        })
}
