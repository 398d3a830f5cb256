//! External extractor integration.
//!
//! This crate provides:
//! - `ProcessSupervisor`: runs one extractor process per job and reports
//!   its output lines and exit outcome
//! - `LineSplitter`: incremental byte-to-line splitting for process streams
//! - `FormatSelector`: builds the extractor argument vector for a request

pub mod error;
pub mod lines;
pub mod selector;
pub mod supervisor;

pub use error::{MediaError, MediaResult};
pub use lines::LineSplitter;
pub use selector::{artifact_path, CommandLine, FormatSelector, YtDlpSelector, ARTIFACT_STEM};
pub use supervisor::{
    ExitOutcome, ProcessHandle, ProcessObserver, ProcessSupervisor, MAX_DIAGNOSTIC_CHARS,
};
