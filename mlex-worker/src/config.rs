//! Worker configuration
//!
//! Defines all configurable parameters for the worker including registry
//! connection settings, the container engine, polling intervals and retry
//! limits.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration
///
/// All intervals and retry limits are configurable to allow tuning for
/// different deployment scenarios (dev vs prod, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct Config {
    /// Registry base URL including the API prefix
    pub registry_url: String,

    /// Container engine binary ("docker" or "podman")
    pub engine: String,

    /// Sleep between two polls of a running job
    pub poll_interval: Duration,

    /// Sleep before asking again when no job is queued
    pub idle_interval: Duration,

    /// Timeout applied to every registry request
    pub http_timeout: Duration,

    /// Container creation attempts when the engine connection drops
    pub launch_attempts: u32,

    /// Terminal status attempts when the registry cannot be reached
    pub report_attempts: u32,

    /// Local directory receiving files copied out of containers
    pub scratch_dir: PathBuf,

    /// Remove each container after its terminal status is reported
    pub remove_containers: bool,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(registry_url: String) -> Self {
        Self {
            registry_url,
            engine: "docker".to_string(),
            poll_interval: Duration::from_secs(1),
            idle_interval: Duration::from_secs(1),
            http_timeout: Duration::from_secs(30),
            launch_attempts: 3,
            report_attempts: 5,
            scratch_dir: std::env::temp_dir(),
            remove_containers: true,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.registry_url.is_empty() {
            anyhow::bail!("registry_url cannot be empty");
        }

        if !self.registry_url.starts_with("http://") && !self.registry_url.starts_with("https://")
        {
            anyhow::bail!("registry_url must start with http:// or https://");
        }

        if self.engine.trim().is_empty() {
            anyhow::bail!("engine cannot be empty");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.idle_interval.is_zero() {
            anyhow::bail!("idle_interval must be greater than 0");
        }

        if self.http_timeout.is_zero() {
            anyhow::bail!("http_timeout must be greater than 0");
        }

        if self.launch_attempts == 0 {
            anyhow::bail!("launch_attempts must be at least 1");
        }

        if self.report_attempts == 0 {
            anyhow::bail!("report_attempts must be at least 1");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("http://job-service:8080/api/v0".to_string())
    }
}
