//! Job handlers.
//!
//! Provides REST API endpoints for:
//! - Creating a job and getting its status
//! - Following progress as server-sent events
//! - Downloading the finished artifact
//! - Cancelling a job

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::Json;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use mfetch_jobs::Artifact;
use mfetch_models::{FeedEvent, JobId, JobRequest, JobSnapshot, OutputFormat};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

/// Body of `POST /api/jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub url: String,
    /// `mp3` or `mp4`; defaults to `mp4`
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub quality: Option<QualityHint>,
}

/// Maximum video height, accepted as a JSON number or string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum QualityHint {
    Number(u64),
    Text(String),
}

impl QualityHint {
    fn as_param(&self) -> String {
        match self {
            QualityHint::Number(n) => n.to_string(),
            QualityHint::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: JobId,
    pub progress_url: String,
    pub download_url: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a job. Returns as soon as the job is registered.
pub async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    let Json(payload) = payload.map_err(|e| ApiError::validation(e.body_text()))?;

    let quality = payload.quality.as_ref().map(QualityHint::as_param);
    let format = payload
        .format
        .as_deref()
        .unwrap_or(OutputFormat::default().as_str());
    let request = JobRequest::parse(&payload.url, format, quality.as_deref())
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let job_id = state.jobs.submit(request).await?;
    info!(job_id = %job_id, format, "Job accepted");

    let response = CreateJobResponse {
        progress_url: format!("/api/jobs/{}/progress", job_id),
        download_url: format!("/api/jobs/{}/download", job_id),
        job_id,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Current job state.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let snapshot = state.jobs.snapshot(&JobId::from(job_id))?;
    Ok(Json(snapshot))
}

/// Progress feed as server-sent events named `state` or `expired`.
pub async fn job_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let job_id = JobId::from(job_id);
    state.jobs.snapshot(&job_id)?;

    let feed = state.jobs.progress(&job_id);
    metrics::progress_stream_opened();
    let guard = scopeguard::guard((), |_| metrics::progress_stream_closed());

    let stream = async_stream::stream! {
        let _guard = guard;
        let mut feed = Box::pin(feed);
        while let Some(event) = feed.next().await {
            yield Ok::<_, Infallible>(sse_event(&event));
        }
        debug!(job_id = %job_id, "Progress stream finished");
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Stream the finished artifact.
pub async fn download_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let artifact = state.jobs.open_artifact(&JobId::from(job_id)).await?;
    metrics::record_download_started(artifact.format.as_str(), false);
    artifact_response(artifact)
}

/// Cancel a job and delete everything it produced.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<StatusCode> {
    let job_id = JobId::from(job_id);
    if state.jobs.cancel(&job_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("job {}", job_id)))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn sse_event(event: &FeedEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(serde_json::to_string(event).unwrap_or_default())
}

/// Build a streaming response for an opened artifact.
///
/// The lease moves into the body stream, so the job stays pinned until the
/// transfer completes or the client goes away.
pub(crate) fn artifact_response(artifact: Artifact) -> ApiResult<Response> {
    let Artifact {
        lease,
        file,
        len,
        format,
    } = artifact;

    let body = async_stream::stream! {
        let lease = lease;
        let mut chunks = ReaderStream::new(file);
        while let Some(chunk) = chunks.next().await {
            yield chunk;
        }
        debug!(job_id = %lease.job_id(), "Artifact transfer finished");
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.content_type())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", format.download_name()),
        )
        .header(header::CONTENT_LENGTH, len)
        .body(Body::from_stream(body))
        .map_err(|e| ApiError::internal(e.to_string()))
}
