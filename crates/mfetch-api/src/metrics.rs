//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Install the Prometheus metrics recorder.
/// Returns a handle used to render `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "mfetch_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "mfetch_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "mfetch_http_requests_in_flight";

    pub const DOWNLOADS_STARTED_TOTAL: &str = "mfetch_downloads_started_total";
    pub const PROGRESS_STREAMS_ACTIVE: &str = "mfetch_progress_streams_active";

    pub const RATE_LIMIT_HITS_TOTAL: &str = "mfetch_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an artifact transfer starting.
pub fn record_download_started(format: &str, direct: bool) {
    let labels = [
        ("format", format.to_string()),
        ("direct", direct.to_string()),
    ];
    counter!(names::DOWNLOADS_STARTED_TOTAL, &labels).increment(1);
}

pub fn progress_stream_opened() {
    gauge!(names::PROGRESS_STREAMS_ACTIVE).increment(1.0);
}

pub fn progress_stream_closed() {
    gauge!(names::PROGRESS_STREAMS_ACTIVE).decrement(1.0);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

static UUID_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("valid regex")
});

static JOB_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/api/jobs/[^/]+").expect("valid regex"));

/// Sanitize path for metrics labels (collapse job IDs).
fn sanitize_path(path: &str) -> String {
    let path = UUID_SEGMENT.replace_all(path, ":id");
    let path = JOB_SEGMENT.replace(&path, "/api/jobs/:id");
    path.to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/jobs/550e8400-e29b-41d4-a716-446655440000/progress"),
            "/api/jobs/:id/progress"
        );
        assert_eq!(sanitize_path("/api/jobs/whatever"), "/api/jobs/:id");
        assert_eq!(sanitize_path("/api/jobs"), "/api/jobs");
        assert_eq!(sanitize_path("/d"), "/d");
    }
}
