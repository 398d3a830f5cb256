//! Axum HTTP API for media fetch jobs.
//!
//! This crate provides:
//! - Job creation, status, progress (SSE), download and cancellation
//! - One-shot direct downloads at `/d`
//! - Shared access key checks, rate limiting and security headers
//! - Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
