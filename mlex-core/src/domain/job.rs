//! Job domain types

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Job record as held by the registry
///
/// The worker refreshes its copy on every poll tick to observe `terminate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub uid: String,
    pub job_kwargs: JobKwargs,
    /// Host directory mounted into the container; an empty string means none
    #[serde(default, deserialize_with = "empty_as_none")]
    pub working_directory: Option<String>,
    /// Cooperative cancellation flag, set by the registry only
    #[serde(default)]
    pub terminate: Option<bool>,
    #[serde(default)]
    pub status: Status,
}

impl Job {
    /// Whether the registry has asked for this job to be stopped
    pub fn terminate_requested(&self) -> bool {
        self.terminate.unwrap_or(false)
    }

    /// Checks the launch parameters before anything is handed to the engine
    pub fn validate(&self) -> Result<(), String> {
        if self.uid.trim().is_empty() {
            return Err("job uid cannot be empty".to_string());
        }
        if self.job_kwargs.image.trim().is_empty() {
            return Err(format!("job {} has no image reference", self.uid));
        }
        if self.job_kwargs.command.is_empty() {
            return Err(format!("job {} has no command", self.uid));
        }
        Ok(())
    }
}

/// Launch parameters of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobKwargs {
    /// Image reference to run
    #[serde(rename = "uri", alias = "image")]
    pub image: String,

    /// Command passed to the image
    #[serde(rename = "cmd", alias = "command")]
    pub command: JobCommand,

    /// Container port (e.g. "8050" or "8050/tcp") to requested host port
    #[serde(rename = "map", alias = "port_map", default)]
    pub port_map: Option<BTreeMap<String, HostPort>>,
}

/// A job command, either a shell-style string or an explicit argv
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobCommand {
    Shell(String),
    Argv(Vec<String>),
}

impl JobCommand {
    pub fn is_empty(&self) -> bool {
        match self {
            JobCommand::Shell(cmd) => cmd.trim().is_empty(),
            JobCommand::Argv(argv) => argv.is_empty(),
        }
    }
}

/// Requested host side of a port binding
///
/// `null` on the wire lets the engine pick a free host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u16>", into = "Option<u16>")]
pub enum HostPort {
    Auto,
    Fixed(u16),
}

impl From<Option<u16>> for HostPort {
    fn from(value: Option<u16>) -> Self {
        match value {
            Some(port) => HostPort::Fixed(port),
            None => HostPort::Auto,
        }
    }
}

impl From<HostPort> for Option<u16> {
    fn from(value: HostPort) -> Self {
        match value {
            HostPort::Auto => None,
            HostPort::Fixed(port) => Some(port),
        }
    }
}

/// Job status as reported to the registry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    pub state: JobState,
    #[serde(default)]
    pub return_code: Option<String>,
}

impl Status {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            return_code: None,
        }
    }

    pub fn failed(return_code: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            return_code: Some(return_code.into()),
        }
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
    Terminated,
    /// Any state this worker does not act on (e.g. "queued")
    #[serde(other)]
    Unknown,
}

impl JobState {
    /// Terminal states are reported at most once per job
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Complete | JobState::Failed | JobState::Terminated
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Complete => write!(f, "complete"),
            JobState::Failed => write!(f, "failed"),
            JobState::Terminated => write!(f, "terminated"),
            JobState::Unknown => write!(f, "unknown"),
        }
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|dir| !dir.trim().is_empty()))
}
