//! Job orchestration configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Job orchestration configuration.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Parent directory of all job workspaces
    pub work_dir: PathBuf,
    /// Age after which a job is evicted, finished or not
    pub job_ttl: Duration,
    /// How often the sweeper looks for expired jobs
    pub sweep_interval: Duration,
    /// Maximum extractor processes running at once
    pub max_concurrent_jobs: usize,
    /// Delay between progress feed snapshots
    pub progress_poll_interval: Duration,
    /// How long a feed stays open after delivering a terminal state
    pub progress_grace: Duration,
    /// Extractor program name or path
    pub extractor_program: String,
    /// Reclaim a job as soon as its artifact has been downloaded
    pub cleanup_after_download: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("mfetch"),
            job_ttl: Duration::from_secs(900), // 15 minutes
            sweep_interval: Duration::from_secs(60),
            max_concurrent_jobs: 4,
            progress_poll_interval: Duration::from_millis(1000),
            progress_grace: Duration::from_millis(2000),
            extractor_program: "yt-dlp".to_string(),
            cleanup_after_download: true,
        }
    }
}

impl JobsConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("MFETCH_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            job_ttl: Duration::from_secs(
                std::env::var("JOB_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(900),
            ),
            sweep_interval: Duration::from_secs(
                std::env::var("SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|s| *s > 0)
                    .unwrap_or(60),
            ),
            max_concurrent_jobs: std::env::var("MAX_CONCURRENT_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(4),
            progress_poll_interval: Duration::from_millis(
                std::env::var("PROGRESS_POLL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|ms| *ms > 0)
                    .unwrap_or(1000),
            ),
            progress_grace: Duration::from_millis(
                std::env::var("PROGRESS_GRACE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            extractor_program: std::env::var("YTDLP_PATH")
                .unwrap_or(defaults.extractor_program),
            cleanup_after_download: std::env::var("CLEANUP_AFTER_DOWNLOAD")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }
}
