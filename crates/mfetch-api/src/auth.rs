//! Shared access key check.
//!
//! The key is accepted from the `key` query parameter (so plain links work)
//! or the `X-Api-Key` header.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "X-Api-Key";
pub const API_KEY_PARAM: &str = "key";

/// Reject requests that do not carry the configured access key.
pub async fn require_access_key(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.access_key.as_deref() else {
        warn!("Rejecting request: access key not configured");
        return ApiError::AccessKeyNotConfigured.into_response();
    };

    match presented_key(&request) {
        Some(key) if key_matches(key.as_bytes(), expected.as_bytes()) => {
            next.run(request).await
        }
        Some(_) => ApiError::unauthorized("invalid access key").into_response(),
        None => ApiError::unauthorized("missing access key").into_response(),
    }
}

fn presented_key(request: &Request<Body>) -> Option<String> {
    if let Some(value) = request.headers().get(API_KEY_HEADER) {
        if let Ok(key) = value.to_str() {
            return Some(key.to_string());
        }
    }

    request.uri().query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == API_KEY_PARAM)
            .map(|(_, value)| value.into_owned())
    })
}

/// Constant-time comparison; slices of different length never match.
fn key_matches(presented: &[u8], expected: &[u8]) -> bool {
    presented.ct_eq(expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_matches() {
        assert!(key_matches(b"secret", b"secret"));
        assert!(!key_matches(b"secret", b"secreT"));
        assert!(!key_matches(b"secret", b"secret2"));
        assert!(!key_matches(b"", b"secret"));
    }

    #[test]
    fn test_presented_key_sources() {
        let request = Request::builder()
            .uri("/d?url=https%3A%2F%2Fx.test&key=s%20k")
            .body(Body::empty())
            .unwrap();
        assert_eq!(presented_key(&request).as_deref(), Some("s k"));

        let request = Request::builder()
            .uri("/api/jobs/1?key=query")
            .header(API_KEY_HEADER, "header")
            .body(Body::empty())
            .unwrap();
        assert_eq!(presented_key(&request).as_deref(), Some("header"));

        let request = Request::builder().uri("/api/jobs").body(Body::empty()).unwrap();
        assert_eq!(presented_key(&request), None);
    }
}
