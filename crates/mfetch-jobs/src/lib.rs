//! Asynchronous job orchestration.
//!
//! This crate provides:
//! - `JobRegistry`: the single source of truth for job state, including
//!   idempotent cleanup and TTL-based eviction
//! - `ProgressChannel`: finite, pollable progress feeds per job
//! - `JobManager`: admission control and extractor supervision per job
//! - `Sweeper`: background eviction loop

pub mod config;
pub mod error;
pub mod feed;
pub mod manager;
pub mod registry;
pub mod sweeper;

pub use config::JobsConfig;
pub use error::{FailureReason, JobError, JobResult};
pub use feed::ProgressChannel;
pub use manager::JobManager;
pub use registry::{Artifact, ArtifactLease, JobEntry, JobRegistry};
pub use sweeper::Sweeper;
