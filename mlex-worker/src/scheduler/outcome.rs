//! Terminal decisions of the job controller

use mlex_core::domain::job::{JobState, Status};

/// Why a job ended in `failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The container could not be created
    LaunchFault,
    /// The container exited nonzero or monitoring hit an unrecoverable error
    RuntimeFault,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::LaunchFault => write!(f, "launch fault"),
            FailureKind::RuntimeFault => write!(f, "runtime fault"),
        }
    }
}

/// How a job left the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Complete,
    Failed {
        kind: FailureKind,
        return_code: String,
    },
    /// Cancelled through the registry's terminate flag
    Terminated,
    /// The job vanished from the registry; there is nothing to report to
    Abandoned { reason: String },
}

impl Outcome {
    pub fn launch_fault(return_code: impl Into<String>) -> Self {
        Outcome::Failed {
            kind: FailureKind::LaunchFault,
            return_code: return_code.into(),
        }
    }

    pub fn runtime_fault(return_code: impl Into<String>) -> Self {
        Outcome::Failed {
            kind: FailureKind::RuntimeFault,
            return_code: return_code.into(),
        }
    }

    /// Terminal status sent to the registry, if any
    pub fn status(&self) -> Option<Status> {
        match self {
            Outcome::Complete => Some(Status::new(JobState::Complete)),
            Outcome::Failed { return_code, .. } => Some(Status::failed(return_code.clone())),
            Outcome::Terminated => Some(Status::new(JobState::Terminated)),
            Outcome::Abandoned { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Complete => "complete",
            Outcome::Failed { .. } => "failed",
            Outcome::Terminated => "terminated",
            Outcome::Abandoned { .. } => "abandoned",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_statuses() {
        assert_eq!(
            Outcome::Complete.status(),
            Some(Status::new(JobState::Complete))
        );
        assert_eq!(
            Outcome::Terminated.status(),
            Some(Status::new(JobState::Terminated))
        );
        assert_eq!(
            Outcome::runtime_fault("Code: 2 Error: None").status(),
            Some(Status::failed("Code: 2 Error: None"))
        );
        assert_eq!(
            Outcome::Abandoned {
                reason: "gone".to_string()
            }
            .status(),
            None
        );
    }

    #[test]
    fn test_every_reported_status_is_terminal() {
        let outcomes = [
            Outcome::Complete,
            Outcome::Terminated,
            Outcome::launch_fault("bad image"),
            Outcome::runtime_fault("Code: 1 Error: None"),
        ];
        for outcome in outcomes {
            assert!(outcome.status().unwrap().state.is_terminal());
        }
    }
}
