//! Job manager: admission and execution of extractor jobs.

use std::sync::Arc;
use std::time::Instant;

use futures_util::{Stream, StreamExt};
use metrics::{gauge, histogram};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, Instrument};

use mfetch_media::{
    ExitOutcome, FormatSelector, MediaError, ProcessObserver, ProcessSupervisor, YtDlpSelector,
};
use mfetch_models::{FeedEvent, JobId, JobRequest, JobSnapshot};

use crate::config::JobsConfig;
use crate::error::{FailureReason, JobError, JobResult};
use crate::feed::ProgressChannel;
use crate::registry::{Artifact, JobEntry, JobRegistry};

/// Entry point of the job subsystem.
///
/// Submitting a job returns as soon as it is registered; a background task
/// then waits for an admission permit, runs the extractor and records the
/// outcome in the registry.
pub struct JobManager {
    registry: Arc<JobRegistry>,
    supervisor: ProcessSupervisor,
    selector: Arc<dyn FormatSelector>,
    admission: Arc<Semaphore>,
    progress: ProgressChannel,
    max_concurrent_jobs: usize,
}

impl JobManager {
    /// Manager running the configured `yt-dlp`.
    pub fn new(config: &JobsConfig) -> Self {
        let selector = Arc::new(YtDlpSelector::new(config.extractor_program.clone()));
        Self::with_selector(config, selector)
    }

    pub fn with_selector(config: &JobsConfig, selector: Arc<dyn FormatSelector>) -> Self {
        let registry = Arc::new(JobRegistry::new(config));
        let progress = ProgressChannel::new(Arc::clone(&registry), config);
        let max_concurrent_jobs = config.max_concurrent_jobs.max(1);

        Self {
            registry,
            supervisor: ProcessSupervisor::new(),
            selector,
            admission: Arc::new(Semaphore::new(max_concurrent_jobs)),
            progress,
            max_concurrent_jobs,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    /// Jobs currently holding an admission slot.
    pub fn running_jobs(&self) -> usize {
        self.max_concurrent_jobs - self.admission.available_permits()
    }

    /// Register a job and start it in the background.
    pub async fn submit(&self, request: JobRequest) -> JobResult<JobId> {
        let entry = self.registry.create(request).await?;
        let job_id = entry.id().clone();

        let task = run_job(
            Arc::clone(&self.registry),
            self.supervisor.clone(),
            Arc::clone(&self.selector),
            Arc::clone(&self.admission),
            entry,
        );
        tokio::spawn(task.instrument(info_span!("job", job_id = %job_id)));

        Ok(job_id)
    }

    pub fn snapshot(&self, job_id: &JobId) -> JobResult<JobSnapshot> {
        self.registry
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.clone()))
    }

    /// Live progress feed for a job.
    pub fn progress(&self, job_id: &JobId) -> impl Stream<Item = FeedEvent> + Send + 'static {
        self.progress.subscribe(job_id.clone())
    }

    pub async fn open_artifact(&self, job_id: &JobId) -> JobResult<Artifact> {
        self.registry.open_artifact(job_id).await
    }

    /// Cancel a job and release everything it holds.
    ///
    /// Returns `false` if the job was unknown or already cleaned up.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        let cancelled = self.registry.cleanup(job_id).await;
        if cancelled {
            info!(job_id = %job_id, "Job cancelled");
        }
        cancelled
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait_for_terminal(&self, job_id: &JobId) -> JobResult<JobSnapshot> {
        let mut feed = std::pin::pin!(self.progress(job_id));
        while let Some(event) = feed.next().await {
            if event == FeedEvent::Expired {
                break;
            }
            if event.is_terminal() {
                return self.snapshot(job_id);
            }
        }
        Err(JobError::NotFound(job_id.clone()))
    }
}

/// Routes supervisor callbacks into the registry.
struct JobObserver {
    registry: Arc<JobRegistry>,
    job_id: JobId,
}

impl ProcessObserver for JobObserver {
    fn on_line(&self, line: &str) {
        self.registry.record_progress(&self.job_id, line);
    }

    fn on_exit(&self, outcome: ExitOutcome) {
        self.registry.finish(&self.job_id, outcome);
    }
}

async fn run_job(
    registry: Arc<JobRegistry>,
    supervisor: ProcessSupervisor,
    selector: Arc<dyn FormatSelector>,
    admission: Arc<Semaphore>,
    entry: Arc<JobEntry>,
) {
    let cancel = entry.cancel_token().clone();

    let permit = tokio::select! {
        permit = admission.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                registry.fail(entry.id(), FailureReason::StartFailed("admission closed".to_string()));
                return;
            }
        },
        _ = cancel.cancelled() => {
            debug!("Job cancelled while waiting for admission");
            return;
        }
    };

    gauge!("mfetch_jobs_active").increment(1.0);
    let started = Instant::now();

    let command = selector.command(entry.request(), entry.workspace());
    let observer = Arc::new(JobObserver {
        registry: Arc::clone(&registry),
        job_id: entry.id().clone(),
    });

    match supervisor.start(&command, entry.workspace(), observer, cancel.child_token()) {
        Ok(handle) => {
            registry.attach_process(entry.id(), handle.clone());
            handle.wait().await;
        }
        Err(MediaError::Cancelled) => debug!("Job cancelled before the extractor started"),
        Err(e) => {
            error!("Failed to start extractor: {}", e);
            registry.fail(entry.id(), FailureReason::StartFailed(e.to_string()));
        }
    }

    drop(permit);
    gauge!("mfetch_jobs_active").decrement(1.0);
    histogram!("mfetch_job_duration_seconds").record(started.elapsed().as_secs_f64());
}
