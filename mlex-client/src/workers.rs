//! Worker-related API endpoints

use crate::RegistryClient;
use crate::error::Result;
use mlex_core::domain::worker::Worker;

impl RegistryClient {
    /// Get a worker descriptor by uid
    ///
    /// Fails with [`ClientError::NotFound`](crate::ClientError::NotFound) when
    /// the registry has no such worker.
    pub async fn fetch_worker(&self, worker_uid: &str) -> Result<Worker> {
        let url = format!("{}/workers/{}", self.base_url, worker_uid);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
