//! Job error types.

use std::fmt;

use mfetch_models::{JobId, ValidationError};
use thiserror::Error;

pub type JobResult<T> = Result<T, JobError>;

/// Errors returned synchronously to callers of the job subsystem.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {0} is still running")]
    NotReady(JobId),

    #[error("Job failed: {0}")]
    Failed(String),

    #[error("Artifact for job {0} is no longer available")]
    ArtifactGone(JobId),

    #[error("Workspace error: {0}")]
    Workspace(#[source] std::io::Error),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Why a job ended up `Failed`. Recorded on the job, never thrown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Extractor exited non-zero; carries its diagnostic tail
    ProcessError { code: Option<i32>, diagnostic: String },
    /// Extractor exited zero but the artifact is not in the workspace
    ArtifactMissing,
    /// Killed through cancellation
    Cancelled,
    /// The extractor could not be launched
    StartFailed(String),
}

impl FailureReason {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::ProcessError { .. } => "process_error",
            FailureReason::ArtifactMissing => "artifact_missing",
            FailureReason::Cancelled => "cancelled",
            FailureReason::StartFailed(_) => "start_failed",
        }
    }
}

/// Renders the `errorText` shown to clients.
impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ProcessError { diagnostic, .. } if !diagnostic.is_empty() => {
                f.write_str(diagnostic)
            }
            FailureReason::ProcessError { code: Some(code), .. } => {
                write!(f, "Extractor exited with code {}", code)
            }
            FailureReason::ProcessError { code: None, .. } => {
                f.write_str("Extractor terminated by a signal")
            }
            FailureReason::ArtifactMissing => {
                f.write_str("Extractor finished but produced no output file")
            }
            FailureReason::Cancelled => f.write_str("Cancelled"),
            FailureReason::StartFailed(msg) => write!(f, "Failed to start extractor: {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text() {
        let reason = FailureReason::ProcessError {
            code: Some(1),
            diagnostic: "network error".to_string(),
        };
        assert_eq!(reason.to_string(), "network error");
        assert_eq!(reason.kind(), "process_error");

        let reason = FailureReason::ProcessError {
            code: Some(3),
            diagnostic: String::new(),
        };
        assert_eq!(reason.to_string(), "Extractor exited with code 3");
    }
}
