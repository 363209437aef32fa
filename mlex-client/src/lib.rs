//! MLEx Registry Client
//!
//! A typed HTTP client for the job registry consumed by MLEx workers.
//!
//! Every operation maps network-level failures to
//! [`ClientError::Transport`], keeping them distinct from missing records
//! ([`ClientError::NotFound`]) and rejected requests, so callers can decide
//! between retrying and giving up.
//!
//! # Example
//!
//! ```no_run
//! use mlex_client::RegistryClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mlex_client::ClientError> {
//!     let client = RegistryClient::new("http://job-service:8080/api/v0");
//!
//!     if let Some(job) = client.claim_next_job("worker-1").await? {
//!         println!("Claimed job: {}", job.uid);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod workers;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client for the job registry API
///
/// Endpoints are grouped into:
/// - Worker descriptors
/// - Job lookup and claiming
/// - Private job updates (status, log frames, port mappings)
#[derive(Debug, Clone)]
pub struct RegistryClient {
    /// Base URL including the API prefix (e.g., "http://job-service:8080/api/v0")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl RegistryClient {
    /// Create a new registry client
    ///
    /// # Example
    /// ```
    /// use mlex_client::RegistryClient;
    ///
    /// let client = RegistryClient::new("http://job-service:8080/api/v0");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new registry client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Create a registry client whose requests give up after `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Get the base URL of the registry
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize a JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Check the status code of a response whose body is ignored
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        self.check_status(response).await?;
        Ok(())
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if status.as_u16() == 404 {
            return Err(ClientError::NotFound(format!("{} ({})", url, error_text)));
        }
        Err(ClientError::api_error(status.as_u16(), error_text))
    }
}
