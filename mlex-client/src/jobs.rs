//! Job-related API endpoints

use crate::RegistryClient;
use crate::error::{ClientError, Result};
use mlex_core::domain::job::{Job, Status};
use mlex_core::dto::job::{MAX_LOG_FRAME_CHARS, PortMapping, PortMappingRequest};
use tracing::debug;

impl RegistryClient {
    // =============================================================================
    // Job Lookup
    // =============================================================================

    /// Get a job by uid
    ///
    /// Used both to resolve a claimed job and to re-poll its `terminate` flag.
    pub async fn fetch_job(&self, job_uid: &str) -> Result<Job> {
        let url = format!("{}/jobs/{}", self.base_url, job_uid);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Claim the next job queued for a worker
    ///
    /// # Returns
    /// `None` when nothing is queued for this worker
    pub async fn claim_next_job(&self, worker_uid: &str) -> Result<Option<Job>> {
        let url = format!("{}/private/jobs", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("worker_uid", worker_uid)])
            .send()
            .await?;

        let response = self.check_status(response).await?;
        let body = response.text().await?;

        parse_next_job(&body)
    }

    // =============================================================================
    // Job Updates (Worker-specific)
    // =============================================================================

    /// Send a status update and/or one log frame in a single request
    ///
    /// # Arguments
    /// * `job_uid` - The job to update
    /// * `status` - New status, sent as the JSON body
    /// * `logs` - One log frame of at most [`MAX_LOG_FRAME_CHARS`] characters,
    ///   sent as the `logs` query parameter. Longer deltas must be split by the
    ///   caller.
    pub async fn report_status(
        &self,
        job_uid: &str,
        status: Option<&Status>,
        logs: Option<&str>,
    ) -> Result<()> {
        if status.is_none() && logs.is_none() {
            return Err(ClientError::InvalidRequest(
                "a job update needs a status or logs".to_string(),
            ));
        }
        if let Some(frame) = logs {
            let chars = frame.chars().count();
            if chars > MAX_LOG_FRAME_CHARS {
                return Err(ClientError::InvalidRequest(format!(
                    "log frame of {} characters exceeds the {} limit",
                    chars, MAX_LOG_FRAME_CHARS
                )));
            }
        }

        let url = format!("{}/private/jobs/{}/update", self.base_url, job_uid);
        let mut request = self.client.patch(&url);
        if let Some(frame) = logs {
            request = request.query(&[("logs", frame)]);
        }
        if let Some(status) = status {
            request = request.json(status);
        }

        let response = request.send().await?;
        let http_status = response.status();
        self.handle_empty_response(response).await?;

        match status {
            Some(status) => debug!(
                "Update job {} with status {}: {}",
                job_uid, status.state, http_status
            ),
            None => debug!("Update job {} logs: {}", job_uid, http_status),
        }
        Ok(())
    }

    /// Report the concrete host ports bound for a job's container
    pub async fn report_port_mapping(&self, job_uid: &str, ports: &PortMapping) -> Result<()> {
        let url = format!("{}/private/jobs/{}/update/mapping", self.base_url, job_uid);
        let response = self
            .client
            .patch(&url)
            .json(&PortMappingRequest {
                ports: ports.clone(),
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}

/// Parses the body of `GET private/jobs`
///
/// The registry answers with an empty body, `null` or `{}` when no job is
/// queued for the worker.
fn parse_next_job(body: &str) -> Result<Option<Job>> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| ClientError::ParseError(format!("Failed to parse next job: {}", e)))?;

    let is_empty = match &value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if is_empty {
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ClientError::ParseError(format!("Failed to parse next job: {}", e)))
}
