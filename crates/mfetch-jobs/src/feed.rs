//! Per-job progress feeds.
//!
//! A feed polls the registry on a fixed interval and yields the job's
//! current state each time. It ends after a terminal state (repeated once
//! after a short grace period) or as soon as the job disappears.

use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use mfetch_models::{FeedEvent, JobId};

use crate::config::JobsConfig;
use crate::registry::JobRegistry;

/// Factory for progress feeds.
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    registry: Arc<JobRegistry>,
    poll_interval: Duration,
    grace: Duration,
}

impl ProgressChannel {
    pub fn new(registry: Arc<JobRegistry>, config: &JobsConfig) -> Self {
        Self {
            registry,
            poll_interval: config.progress_poll_interval,
            grace: config.progress_grace,
        }
    }

    /// Feed for one job. Nothing is read until the stream is first polled;
    /// dropping it has no effect on the job.
    pub fn subscribe(&self, job_id: JobId) -> impl Stream<Item = FeedEvent> + Send + 'static {
        let registry = Arc::clone(&self.registry);
        let poll_interval = self.poll_interval;
        let grace = self.grace;

        async_stream::stream! {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let snapshot = match registry.get(&job_id) {
                    Some(snapshot) => snapshot,
                    None => {
                        debug!(job_id = %job_id, "Job gone, closing progress feed");
                        yield FeedEvent::Expired;
                        break;
                    }
                };

                let event = FeedEvent::from(&snapshot);
                if !event.is_terminal() {
                    yield event;
                    continue;
                }

                yield event.clone();
                tokio::time::sleep(grace).await;

                // The job may have been reclaimed meanwhile; its final state
                // does not change, so repeat what was seen.
                let last = registry
                    .get(&job_id)
                    .map(|snapshot| FeedEvent::from(&snapshot))
                    .unwrap_or(event);
                yield last;
                debug!(job_id = %job_id, "Progress feed complete");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use mfetch_media::ExitOutcome;
    use mfetch_models::{JobRequest, JobStatus};

    fn config(dir: &std::path::Path) -> JobsConfig {
        JobsConfig {
            work_dir: dir.to_path_buf(),
            progress_poll_interval: Duration::from_millis(20),
            progress_grace: Duration::from_millis(30),
            ..JobsConfig::default()
        }
    }

    fn status_of(event: &FeedEvent) -> Option<JobStatus> {
        match event {
            FeedEvent::State { status, .. } => Some(*status),
            FeedEvent::Expired => None,
        }
    }

    #[tokio::test]
    async fn test_unknown_job_expires_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let channel = ProgressChannel::new(Arc::new(JobRegistry::new(&config)), &config);

        let events: Vec<FeedEvent> = channel.subscribe(JobId::from("nope")).collect().await;
        assert_eq!(events, vec![FeedEvent::Expired]);
    }

    #[tokio::test]
    async fn test_feed_ends_after_terminal_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let registry = Arc::new(JobRegistry::new(&config));
        let channel = ProgressChannel::new(Arc::clone(&registry), &config);

        let request = JobRequest::parse("https://example.test/a", "mp3", None).unwrap();
        let entry = registry.create(request).await.unwrap();
        let id = entry.id().clone();

        let mut feed = Box::pin(channel.subscribe(id.clone()));
        let first = feed.next().await.unwrap();
        assert_eq!(status_of(&first), Some(JobStatus::Running));

        registry.record_progress(&id, "[download]  50.0%");
        registry.finish(
            &id,
            ExitOutcome {
                code: Some(1),
                cancelled: false,
                diagnostic: "ERROR: network error".to_string(),
            },
        );

        let rest: Vec<FeedEvent> = feed.collect().await;
        let last = rest.last().unwrap();
        assert_eq!(status_of(last), Some(JobStatus::Failed));
        match last {
            FeedEvent::State { error_text, .. } => {
                assert_eq!(error_text.as_deref(), Some("ERROR: network error"))
            }
            FeedEvent::Expired => unreachable!(),
        }
        // Terminal state is delivered, then repeated once after the grace period
        let terminal = rest.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminal, 2);
    }

    #[tokio::test]
    async fn test_feed_expires_when_job_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let registry = Arc::new(JobRegistry::new(&config));
        let channel = ProgressChannel::new(Arc::clone(&registry), &config);

        let request = JobRequest::parse("https://example.test/a", "mp4", None).unwrap();
        let entry = registry.create(request).await.unwrap();

        let mut feed = Box::pin(channel.subscribe(entry.id().clone()));
        assert!(feed.next().await.is_some());

        assert!(registry.cleanup(entry.id()).await);

        let rest: Vec<FeedEvent> = feed.collect().await;
        assert_eq!(rest.last(), Some(&FeedEvent::Expired));
        // Observing never resurrects the job
        assert!(registry.get(entry.id()).is_none());
    }
}
