//! One-shot download: create a job, wait for it, stream the result.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::{debug, info};

use mfetch_jobs::JobManager;
use mfetch_models::{JobId, JobRequest, JobStatus, OutputFormat};

use crate::error::{ApiError, ApiResult};
use crate::handlers::jobs::artifact_response;
use crate::metrics;
use crate::state::AppState;

/// Query of `GET /d`. The access key is checked by the auth layer.
#[derive(Debug, Deserialize)]
pub struct DirectQuery {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
}

/// Fetch `url` and stream the artifact in the same response.
///
/// The job belongs to this request: if the client goes away before the
/// transfer starts, the job is cancelled. Once streaming, the artifact
/// lease in the body takes over.
pub async fn direct_download(
    State(state): State<AppState>,
    Query(query): Query<DirectQuery>,
) -> ApiResult<Response> {
    let format = query
        .format
        .as_deref()
        .unwrap_or(OutputFormat::default().as_str());
    let request = JobRequest::parse(&query.url, format, query.quality.as_deref())
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let job_id = state.jobs.submit(request).await?;
    info!(job_id = %job_id, format, "Direct download started");

    // Runs on every exit except a successful hand-off to the body stream,
    // including the future being dropped on client disconnect.
    let owned = scopeguard::guard(
        (Arc::clone(&state.jobs), job_id.clone()),
        |(jobs, job_id)| abandon(jobs, job_id),
    );

    let snapshot = state.jobs.wait_for_terminal(&job_id).await?;
    if snapshot.status == JobStatus::Failed {
        return Err(ApiError::JobFailed(snapshot.error_text.unwrap_or_default()));
    }

    let artifact = state.jobs.open_artifact(&job_id).await?;
    let _ = scopeguard::ScopeGuard::into_inner(owned);

    metrics::record_download_started(artifact.format.as_str(), true);
    artifact_response(artifact)
}

fn abandon(jobs: Arc<JobManager>, job_id: JobId) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    runtime.spawn(async move {
        if jobs.cancel(&job_id).await {
            debug!(job_id = %job_id, "Direct download abandoned, job cleaned up");
        }
    });
}
