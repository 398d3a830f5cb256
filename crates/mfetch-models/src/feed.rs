//! Live progress feed events.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{JobSnapshot, JobStatus};

/// One element of a job's progress feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// Current job state
    #[serde(rename_all = "camelCase")]
    State {
        status: JobStatus,
        progress_text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_text: Option<String>,
    },

    /// The job is unknown or already cleaned up, whatever state it reached
    Expired,
}

impl FeedEvent {
    /// Event name used on the wire (e.g. as the SSE `event:` field).
    pub fn name(&self) -> &'static str {
        match self {
            FeedEvent::State { .. } => "state",
            FeedEvent::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            FeedEvent::State { status, .. } => status.is_terminal(),
            FeedEvent::Expired => true,
        }
    }
}

impl From<&JobSnapshot> for FeedEvent {
    fn from(snapshot: &JobSnapshot) -> Self {
        FeedEvent::State {
            status: snapshot.status,
            progress_text: snapshot.progress_text.clone(),
            error_text: snapshot.error_text.clone(),
        }
    }
}
