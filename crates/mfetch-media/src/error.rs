//! Error types for extractor operations.

use thiserror::Error;

/// Result type for extractor operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while launching or supervising the extractor.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ProgramNotFound(String),

    #[error("Failed to capture {0} of extractor process")]
    StreamUnavailable(&'static str),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn program_not_found(program: impl Into<String>) -> Self {
        Self::ProgramNotFound(program.into())
    }
}
