//! Shared data models for the mfetch job service.
//!
//! This crate provides Serde-serializable types for:
//! - Job identity, status and snapshots
//! - Output formats and their content types
//! - Validated job requests
//! - Live progress feed events

pub mod feed;
pub mod format;
pub mod job;
pub mod request;

// Re-export common types
pub use feed::FeedEvent;
pub use format::OutputFormat;
pub use job::{JobId, JobSnapshot, JobStatus, STARTING_PROGRESS_TEXT};
pub use request::{JobRequest, ValidationError, MAX_LOCATOR_LENGTH};
