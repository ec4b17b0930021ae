//! Scale-down background worker.
//!
//! Runs a scale-down pass on a periodic interval.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::cache::RunnerClientCache;
use crate::error::ScaleDownError;
use crate::scale_down::{PassReport, ScaleDown};

pub struct ScaleDownWorker {
    scale_down: ScaleDown,
    cache: RunnerClientCache,
    interval: Duration,
}

impl ScaleDownWorker {
    pub fn new(scale_down: ScaleDown, cache: RunnerClientCache, interval: Duration) -> Self {
        Self {
            scale_down,
            cache,
            interval,
        }
    }

    /// Run the worker until shutdown is signaled. A failed pass never stops
    /// the loop; the next tick starts a fresh one.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            minimum_running_time_mins = self.scale_down.config().minimum_running_time.num_minutes(),
            "Starting scale-down worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        if e.is_race() {
                            warn!(error = %e, "Scale-down pass aborted");
                        } else {
                            error!(error = %e, "Scale-down pass failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scale-down worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single pass.
    pub async fn run_once(&mut self) -> Result<PassReport, ScaleDownError> {
        self.scale_down.run_pass(&mut self.cache).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use ghr_id::InstanceId;

    use super::*;
    use crate::coordinator::MockCoordinator;
    use crate::inventory::{RUNNER_APPLICATION, TAG_APPLICATION, TAG_ORG};
    use crate::provider::{MockComputeProvider, ProviderInstance, Tag};
    use crate::scale_down::ScaleDownConfig;

    fn worker(
        provider: &Arc<MockComputeProvider>,
        coordinator: &Arc<MockCoordinator>,
        interval: Duration,
    ) -> ScaleDownWorker {
        let config = ScaleDownConfig {
            enable_org_level: true,
            ..ScaleDownConfig::default()
        };
        ScaleDownWorker::new(
            ScaleDown::new(provider.clone(), coordinator.clone(), config),
            RunnerClientCache::new(coordinator.clone()),
            interval,
        )
    }

    async fn add_old_runner(provider: &MockComputeProvider, id: &str) -> InstanceId {
        let instance_id = InstanceId::parse(id).unwrap();
        provider
            .add_instance(ProviderInstance {
                instance_id: instance_id.clone(),
                launch_time: Some(Utc::now() - chrono::Duration::hours(1)),
                state: "running".to_string(),
                tags: vec![
                    Tag::new(TAG_APPLICATION, RUNNER_APPLICATION),
                    Tag::new(TAG_ORG, "acme"),
                ],
            })
            .await;
        instance_id
    }

    #[tokio::test]
    async fn test_run_once_reclaims_orphans() {
        let provider = Arc::new(MockComputeProvider::new());
        let coordinator = Arc::new(MockCoordinator::new());
        let id = add_old_runner(&provider, "i-1").await;

        let report = worker(&provider, &coordinator, Duration::from_secs(300))
            .run_once()
            .await
            .unwrap();
        assert_eq!(report.terminated(), 1);
        assert_eq!(provider.state_of(&id).await.as_deref(), Some("terminated"));
    }

    #[tokio::test]
    async fn test_worker_survives_failed_passes_and_stops_on_shutdown() {
        let provider = Arc::new(MockComputeProvider::new());
        let coordinator = Arc::new(MockCoordinator::new());
        add_old_runner(&provider, "i-1").await;
        provider.fail_describe(true);

        let mut worker = worker(&provider, &coordinator, Duration::from_millis(10));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            worker.run(shutdown_rx).await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();

        // Several passes ran and failed; none terminated anything.
        assert!(provider.calls().await.len() >= 2);
        assert!(provider.terminated().await.is_empty());
    }
}
