//! Job DTOs for registry communication

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Largest log chunk, in characters, accepted by one status update
pub const MAX_LOG_FRAME_CHARS: usize = 50_000;

/// Concrete host bindings of a running container, keyed by "<port>/<proto>"
///
/// Same shape as the engine's `NetworkSettings.Ports`; unpublished ports map
/// to `None`.
pub type PortMapping = BTreeMap<String, Option<Vec<PortBinding>>>;

/// One host binding of a container port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp", default)]
    pub host_ip: String,
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

/// Body of `PATCH private/jobs/{uid}/update/mapping`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMappingRequest {
    pub ports: PortMapping,
}
