//! Application state.

use std::sync::Arc;

use mfetch_jobs::{JobManager, JobsConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub jobs_config: JobsConfig,
    pub jobs: Arc<JobManager>,
}

impl AppState {
    /// Create new application state running the configured extractor.
    pub fn new(config: ApiConfig, jobs_config: JobsConfig) -> Self {
        let jobs = Arc::new(JobManager::new(&jobs_config));
        Self::with_manager(config, jobs_config, jobs)
    }

    /// State around an existing job manager.
    pub fn with_manager(config: ApiConfig, jobs_config: JobsConfig, jobs: Arc<JobManager>) -> Self {
        Self {
            config,
            jobs_config,
            jobs,
        }
    }
}
