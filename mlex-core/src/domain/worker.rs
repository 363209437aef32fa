//! Worker domain model
//!
//! Describes one worker process: which jobs it drains and the resources
//! every container it launches is given.

use serde::{Deserialize, Serialize};

/// Worker descriptor, immutable for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    /// Unique identifier for the worker
    pub uid: String,

    /// Job uids this worker must resolve before exiting
    #[serde(default)]
    pub jobs_list: Vec<String>,

    /// Resources handed to each launched container
    #[serde(default)]
    pub requirements: Requirements,
}

/// Per-container resource provisioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default = "default_num_processors")]
    pub num_processors: u32,

    /// GPU device ids; empty means no GPU request
    #[serde(default, alias = "list_gpus")]
    pub gpu_ids: Vec<String>,
}

impl Default for Requirements {
    fn default() -> Self {
        Self {
            num_processors: default_num_processors(),
            gpu_ids: Vec::new(),
        }
    }
}

fn default_num_processors() -> u32 {
    1
}

impl Worker {
    /// Parses the descriptor handed to the process at startup
    pub fn from_descriptor(descriptor: &str) -> Result<Self, String> {
        let worker: Worker = serde_json::from_str(descriptor)
            .map_err(|e| format!("invalid worker descriptor: {}", e))?;
        worker.validate()?;
        Ok(worker)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.uid.trim().is_empty() {
            return Err("worker uid cannot be empty".to_string());
        }
        if self.requirements.num_processors == 0 {
            return Err("num_processors must be greater than 0".to_string());
        }
        Ok(())
    }
}
