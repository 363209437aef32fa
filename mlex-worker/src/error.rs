//! Worker error type and fault classification
//!
//! [`classify`] is the single place deciding whether a failure is retried on
//! the next tick or ends the job.

use mlex_client::ClientError;
use thiserror::Error;

use crate::runtime::EngineError;
use crate::scheduler::launch::CommandError;

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Any failure the worker can run into while handling a job
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Registry(#[from] ClientError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The job record cannot be launched as given
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Invalid command: {0}")]
    Command(#[from] CommandError),
}

/// How the controller reacts to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Network-level hiccup; try again on the next tick
    Transport,
    /// The referenced job or worker is gone from the registry
    NotFound,
    /// Anything else; ends the job
    Fatal,
}

/// Engine messages that indicate a dropped connection rather than a real error
const TRANSIENT_MARKERS: &[&str] = &[
    "connection reset by peer",
    "connection aborted",
    "broken pipe",
    "i/o timeout",
];

/// Gateway statuses the registry returns while it is restarting
const TRANSIENT_STATUSES: &[u16] = &[502, 503, 504];

/// Maps an error to the retry-vs-abort policy
pub fn classify(err: &WorkerError) -> Fault {
    match err {
        WorkerError::Registry(e) if e.is_not_found() => Fault::NotFound,
        WorkerError::Registry(e) if e.is_transport() => Fault::Transport,
        WorkerError::Registry(ClientError::ApiError { status, .. })
            if TRANSIENT_STATUSES.contains(status) =>
        {
            Fault::Transport
        }
        WorkerError::Engine(e) if is_transient_message(&e.to_string()) => Fault::Transport,
        _ => Fault::Fatal,
    }
}

fn is_transient_message(message: &str) -> bool {
    let message = message.to_lowercase();
    TRANSIENT_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}
