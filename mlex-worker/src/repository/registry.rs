//! Job registry repository
//!
//! Stateless access to the remote job registry:
//! - Loading worker descriptors
//! - Claiming and re-polling jobs
//! - Reporting status, log frames and port mappings

use async_trait::async_trait;
use mlex_client::{ClientError, RegistryClient};
use mlex_core::domain::job::{Job, Status};
use mlex_core::domain::worker::Worker;
use mlex_core::dto::job::PortMapping;

/// Repository trait for registry operations used by the worker
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetches a worker descriptor
    async fn fetch_worker(&self, worker_uid: &str) -> Result<Worker, ClientError>;

    /// Fetches the current state of a job
    async fn fetch_job(&self, job_uid: &str) -> Result<Job, ClientError>;

    /// Claims the next job queued for this worker, if any
    async fn claim_next_job(&self, worker_uid: &str) -> Result<Option<Job>, ClientError>;

    /// Sends a status and/or a single log frame
    ///
    /// # Arguments
    /// * `job_uid` - The job to update
    /// * `status` - New status, if changing
    /// * `logs` - One bounded log frame, if any
    async fn report_status(
        &self,
        job_uid: &str,
        status: Option<&Status>,
        logs: Option<&str>,
    ) -> Result<(), ClientError>;

    /// Reports the host ports bound for a job's container
    async fn report_port_mapping(&self, job_uid: &str, ports: &PortMapping)
    -> Result<(), ClientError>;
}

/// HTTP implementation of Registry
pub struct HttpRegistry {
    client: RegistryClient,
}

impl HttpRegistry {
    /// Creates a new HTTP registry repository
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn fetch_worker(&self, worker_uid: &str) -> Result<Worker, ClientError> {
        self.client.fetch_worker(worker_uid).await
    }

    async fn fetch_job(&self, job_uid: &str) -> Result<Job, ClientError> {
        self.client.fetch_job(job_uid).await
    }

    async fn claim_next_job(&self, worker_uid: &str) -> Result<Option<Job>, ClientError> {
        self.client.claim_next_job(worker_uid).await
    }

    async fn report_status(
        &self,
        job_uid: &str,
        status: Option<&Status>,
        logs: Option<&str>,
    ) -> Result<(), ClientError> {
        self.client.report_status(job_uid, status, logs).await
    }

    async fn report_port_mapping(
        &self,
        job_uid: &str,
        ports: &PortMapping,
    ) -> Result<(), ClientError> {
        self.client.report_port_mapping(job_uid, ports).await
    }
}
