//! Background service evicting expired jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::JobsConfig;
use crate::registry::JobRegistry;

/// Periodically sweeps the registry for jobs older than the TTL.
#[derive(Debug, Clone)]
pub struct Sweeper {
    registry: Arc<JobRegistry>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(registry: Arc<JobRegistry>, config: &JobsConfig) -> Self {
        Self {
            registry,
            interval: config.sweep_interval,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Meant to be spawned as a background task.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Starting job sweeper (interval: {:?}, ttl: {:?})",
            self.interval,
            self.registry.ttl()
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => {
                    info!("Job sweeper stopped");
                    return;
                }
            }

            let evicted = self.sweep_once().await;
            if evicted > 0 {
                info!("Sweep complete: {} expired jobs evicted", evicted);
            }
        }
    }

    /// Run a single sweep (for testing or manual invocation).
    pub async fn sweep_once(&self) -> usize {
        let evicted = self.registry.sweep().await;
        debug!(evicted, remaining = self.registry.len(), "Sweep finished");
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mfetch_models::JobRequest;

    #[tokio::test]
    async fn test_sweeper_evicts_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let config = JobsConfig {
            work_dir: dir.path().to_path_buf(),
            job_ttl: Duration::ZERO,
            sweep_interval: Duration::from_millis(10),
            ..JobsConfig::default()
        };
        let registry = Arc::new(JobRegistry::new(&config));
        let request = JobRequest::parse("https://example.test/a", "mp3", None).unwrap();
        let entry = registry.create(request).await.unwrap();

        let shutdown = CancellationToken::new();
        let sweeper = Sweeper::new(Arc::clone(&registry), &config);
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { sweeper.run(shutdown).await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("expired job was not swept");
        assert!(!entry.workspace().exists());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
