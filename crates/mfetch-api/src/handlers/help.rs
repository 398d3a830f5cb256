//! Plain-text usage page.

const HELP_TEXT: &str = "\
mfetch: fetch remote media as mp3 or mp4

Direct download (waits for the extractor, then streams the file):
  GET /d?url=<media url>&format=mp3|mp4[&quality=<max height>]&key=<access key>

Job API (send the key as ?key= or the X-Api-Key header):
  POST   /api/jobs                {\"url\": ..., \"format\": \"mp3\"|\"mp4\", \"quality\": 720}
  GET    /api/jobs/:id            job status
  GET    /api/jobs/:id/progress   live progress (server-sent events)
  GET    /api/jobs/:id/download   finished file
  DELETE /api/jobs/:id            cancel and clean up

Service:
  GET /health   GET /ready   GET /metrics
";

/// Usage page served at `/`.
pub async fn help() -> &'static str {
    HELP_TEXT
}
