//! Job registry.
//!
//! Owns every job's state and is the only place lifecycle transitions
//! happen. Entries live in a `DashMap`; each entry guards its mutable state
//! with its own mutex so updates to one job never serialize another.
//!
//! Cleanup ("reaping") is gated by a per-entry `released` flag flipped under
//! that mutex, which makes it run at most once no matter how many triggers
//! (cancellation, download completion, TTL sweep) race for it. Open
//! downloads hold an [`ArtifactLease`]; the sweep skips leased jobs.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mfetch_media::{artifact_path, ExitOutcome, ProcessHandle, MAX_DIAGNOSTIC_CHARS};
use mfetch_models::{
    JobId, JobRequest, JobSnapshot, JobStatus, OutputFormat, STARTING_PROGRESS_TEXT,
};

use crate::config::JobsConfig;
use crate::error::{FailureReason, JobError, JobResult};

/// How long cleanup waits for a killed extractor before removing its workspace.
const PROCESS_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    progress_text: String,
    error_text: Option<String>,
    artifact_path: Option<PathBuf>,
    process: Option<ProcessHandle>,
    leases: usize,
    released: bool,
}

/// One tracked job.
#[derive(Debug)]
pub struct JobEntry {
    id: JobId,
    request: JobRequest,
    workspace: PathBuf,
    created_at: DateTime<Utc>,
    created: Instant,
    cancel: CancellationToken,
    state: Mutex<JobState>,
}

impl JobEntry {
    fn new(id: JobId, request: JobRequest, workspace: PathBuf) -> Self {
        Self {
            id,
            request,
            workspace,
            created_at: Utc::now(),
            created: Instant::now(),
            cancel: CancellationToken::new(),
            state: Mutex::new(JobState {
                status: JobStatus::Running,
                progress_text: STARTING_PROGRESS_TEXT.to_string(),
                error_text: None,
                artifact_path: None,
                process: None,
                leases: 0,
                released: false,
            }),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    pub fn format(&self) -> OutputFormat {
        self.request.format()
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Cancelled when the job is reaped; stops admission waits and kills the
    /// extractor.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Monotonic creation instant, the basis for eviction.
    pub fn created_instant(&self) -> Instant {
        self.created
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.lock();
        JobSnapshot {
            job_id: self.id.clone(),
            status: state.status,
            format: self.format(),
            progress_text: state.progress_text.clone(),
            error_text: state.error_text.clone(),
            artifact_path: state.artifact_path.clone(),
            created_at: self.created_at,
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_released(&self) -> bool {
        self.lock().released
    }

    /// Claim the right to reap this job. Only the first caller wins; unless
    /// `force` is set, a job with open downloads is not claimed.
    fn try_release(&self, force: bool) -> bool {
        let mut state = self.lock();
        if state.released || (!force && state.leases > 0) {
            return false;
        }
        state.released = true;
        true
    }
}

/// An opened artifact ready to be streamed.
#[derive(Debug)]
pub struct Artifact {
    pub lease: ArtifactLease,
    pub file: File,
    pub len: u64,
    pub format: OutputFormat,
}

/// Pins a finished job against eviction while its artifact is being read.
///
/// Dropping the last lease reclaims the job when `cleanup_after_download`
/// is enabled.
#[derive(Debug)]
pub struct ArtifactLease {
    registry: Arc<JobRegistry>,
    entry: Arc<JobEntry>,
}

impl ArtifactLease {
    pub fn job_id(&self) -> &JobId {
        &self.entry.id
    }
}

impl Drop for ArtifactLease {
    fn drop(&mut self) {
        self.registry.release_lease(&self.entry);
    }
}

/// Registry of all live jobs.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Arc<JobEntry>>,
    work_dir: PathBuf,
    ttl: Duration,
    cleanup_after_download: bool,
}

impl JobRegistry {
    pub fn new(config: &JobsConfig) -> Self {
        Self {
            jobs: DashMap::new(),
            work_dir: config.work_dir.clone(),
            ttl: config.job_ttl,
            cleanup_after_download: config.cleanup_after_download,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of jobs currently tracked.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Register a new `Running` job with a freshly created workspace.
    pub async fn create(&self, request: JobRequest) -> JobResult<Arc<JobEntry>> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(JobError::Workspace)?;

        // create_dir (not create_dir_all) fails on an existing directory, so a
        // workspace can never be shared.
        let (id, workspace) = loop {
            let id = JobId::new();
            if self.jobs.contains_key(&id) {
                continue;
            }
            let workspace = self.work_dir.join(id.as_str());
            match tokio::fs::create_dir(&workspace).await {
                Ok(()) => break (id, workspace),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(JobError::Workspace(e)),
            }
        };

        let entry = Arc::new(JobEntry::new(id.clone(), request, workspace));
        self.jobs.insert(id.clone(), Arc::clone(&entry));

        counter!("mfetch_jobs_created_total", "format" => entry.format().as_str()).increment(1);
        gauge!("mfetch_jobs_tracked").set(self.jobs.len() as f64);
        info!(
            job_id = %id,
            format = %entry.format(),
            workspace = %entry.workspace.display(),
            "Job created"
        );

        Ok(entry)
    }

    /// Snapshot of a live job.
    pub fn get(&self, id: &JobId) -> Option<JobSnapshot> {
        self.live_entry(id).map(|entry| entry.snapshot())
    }

    fn lookup(&self, id: &JobId) -> Option<Arc<JobEntry>> {
        self.jobs.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Entries being reaped are already invisible.
    fn live_entry(&self, id: &JobId) -> Option<Arc<JobEntry>> {
        self.lookup(id).filter(|entry| !entry.is_released())
    }

    /// Replace the progress text of a running job.
    pub fn record_progress(&self, id: &JobId, line: &str) {
        let Some(entry) = self.live_entry(id) else {
            return;
        };
        let mut state = entry.lock();
        if state.status == JobStatus::Running {
            debug!(job_id = %id, "{}", line);
            state.progress_text = line.to_string();
        }
    }

    /// Keep the process handle so cleanup can kill it.
    pub fn attach_process(&self, id: &JobId, handle: ProcessHandle) {
        match self.live_entry(id) {
            Some(entry) => {
                let mut state = entry.lock();
                if state.released {
                    handle.cancel();
                } else if !state.status.is_terminal() {
                    state.process = Some(handle);
                }
            }
            None => handle.cancel(),
        }
    }

    /// Apply the extractor's exit outcome.
    ///
    /// A zero exit only counts as success if the artifact is actually in the
    /// workspace.
    pub fn finish(&self, id: &JobId, outcome: ExitOutcome) {
        let Some(entry) = self.live_entry(id) else {
            debug!(job_id = %id, "Exit outcome for a job that is gone, ignoring");
            return;
        };

        let result = if outcome.cancelled {
            Err(FailureReason::Cancelled)
        } else if !outcome.success() {
            Err(FailureReason::ProcessError {
                code: outcome.code,
                diagnostic: outcome.diagnostic,
            })
        } else {
            let path = artifact_path(&entry.workspace, entry.format());
            if path.is_file() {
                Ok(path)
            } else {
                Err(FailureReason::ArtifactMissing)
            }
        };

        Self::transition(&entry, result);
    }

    /// Fail a job that never got a process.
    pub fn fail(&self, id: &JobId, reason: FailureReason) {
        if let Some(entry) = self.live_entry(id) {
            Self::transition(&entry, Err(reason));
        }
    }

    /// The only place a job leaves `Running`. Terminal states are sticky.
    fn transition(entry: &JobEntry, result: Result<PathBuf, FailureReason>) {
        let mut state = entry.lock();
        if state.status.is_terminal() || state.released {
            debug!(job_id = %entry.id, status = %state.status, "Ignoring transition of finished job");
            return;
        }

        state.process = None;
        match result {
            Ok(path) => {
                info!(job_id = %entry.id, artifact = %path.display(), "Job done");
                state.status = JobStatus::Done;
                state.artifact_path = Some(path);
                counter!("mfetch_jobs_completed_total", "format" => entry.format().as_str())
                    .increment(1);
            }
            Err(reason) => {
                let text: String = reason.to_string().chars().take(MAX_DIAGNOSTIC_CHARS).collect();
                warn!(job_id = %entry.id, reason = reason.kind(), error = %text, "Job failed");
                state.status = JobStatus::Failed;
                state.error_text = Some(text);
                counter!("mfetch_jobs_failed_total", "reason" => reason.kind()).increment(1);
            }
        }
    }

    /// Open a finished job's artifact for streaming.
    pub async fn open_artifact(self: &Arc<Self>, id: &JobId) -> JobResult<Artifact> {
        let entry = self.lookup(id).ok_or_else(|| JobError::NotFound(id.clone()))?;

        let path = {
            let mut state = entry.lock();
            match (state.status, state.released) {
                (JobStatus::Done, true) => return Err(JobError::ArtifactGone(id.clone())),
                (_, true) => return Err(JobError::NotFound(id.clone())),
                (JobStatus::Running, false) => return Err(JobError::NotReady(id.clone())),
                (JobStatus::Failed, false) => {
                    return Err(JobError::Failed(state.error_text.clone().unwrap_or_default()))
                }
                (JobStatus::Done, false) => {}
            }
            let Some(path) = state.artifact_path.clone() else {
                return Err(JobError::ArtifactGone(id.clone()));
            };
            state.leases += 1;
            path
        };

        // From here on the lease is released on every exit path.
        let lease = ArtifactLease {
            registry: Arc::clone(self),
            entry: Arc::clone(&entry),
        };

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(JobError::ArtifactGone(id.clone()))
            }
            Err(e) => return Err(JobError::Workspace(e)),
        };
        let len = file.metadata().await.map_err(JobError::Workspace)?.len();

        debug!(job_id = %id, bytes = len, "Artifact opened");

        Ok(Artifact {
            lease,
            file,
            len,
            format: entry.format(),
        })
    }

    fn release_lease(self: &Arc<Self>, entry: &Arc<JobEntry>) {
        let last = {
            let mut state = entry.lock();
            state.leases = state.leases.saturating_sub(1);
            state.leases == 0
        };
        if !last || !self.cleanup_after_download {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(job_id = %entry.id, "No runtime to reclaim downloaded job, leaving it to the sweeper");
            return;
        };
        if entry.try_release(false) {
            let registry = Arc::clone(self);
            let entry = Arc::clone(entry);
            runtime.spawn(async move {
                registry.reap(&entry, "download").await;
            });
        }
    }

    /// Release everything a job holds: kill its process, delete its
    /// workspace, forget it.
    ///
    /// Returns `false` if another trigger already cleaned (or is cleaning)
    /// the job; repeated calls are harmless.
    pub async fn cleanup(&self, id: &JobId) -> bool {
        let Some(entry) = self.lookup(id) else {
            return false;
        };
        if !entry.try_release(true) {
            debug!(job_id = %id, "Job already being cleaned up");
            return false;
        }
        self.reap(&entry, "cleanup").await;
        true
    }

    /// Clean up every job, e.g. on shutdown. Returns how many were cleaned.
    pub async fn cleanup_all(&self) -> usize {
        let ids: Vec<JobId> = self.jobs.iter().map(|e| e.key().clone()).collect();
        let mut cleaned = 0;
        for id in ids {
            if self.cleanup(&id).await {
                cleaned += 1;
            }
        }
        cleaned
    }

    /// Evict jobs older than the TTL.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    /// Evict jobs whose age at `now` exceeds the TTL. Jobs with open
    /// downloads are deferred to a later sweep.
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let expired: Vec<Arc<JobEntry>> = self
            .jobs
            .iter()
            .filter(|e| e.value().age(now) > self.ttl)
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut evicted = 0;
        for entry in expired {
            if entry.try_release(false) {
                info!(
                    job_id = %entry.id,
                    age_secs = entry.age(now).as_secs(),
                    "Evicting expired job"
                );
                self.reap(&entry, "sweep").await;
                evicted += 1;
            } else {
                debug!(job_id = %entry.id, "Eviction deferred, job is being downloaded or cleaned");
            }
        }

        if evicted > 0 {
            counter!("mfetch_jobs_evicted_total").increment(evicted as u64);
        }
        evicted
    }

    /// Caller must have won `try_release`.
    async fn reap(&self, entry: &Arc<JobEntry>, trigger: &'static str) {
        let process = entry.lock().process.take();
        entry.cancel.cancel();

        if let Some(process) = process {
            if tokio::time::timeout(PROCESS_EXIT_TIMEOUT, process.wait())
                .await
                .is_err()
            {
                warn!(job_id = %entry.id, pid = ?process.pid(), "Extractor did not exit after kill");
            }
        }

        match tokio::fs::remove_dir_all(&entry.workspace).await {
            Ok(()) => debug!(job_id = %entry.id, "Workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                job_id = %entry.id,
                workspace = %entry.workspace.display(),
                "Failed to remove workspace: {}", e
            ),
        }

        self.jobs.remove(&entry.id);

        counter!("mfetch_jobs_reaped_total", "trigger" => trigger).increment(1);
        gauge!("mfetch_jobs_tracked").set(self.jobs.len() as f64);
        info!(job_id = %entry.id, trigger, "Job cleaned up");
    }
}
