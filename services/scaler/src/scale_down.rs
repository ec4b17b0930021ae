//! Scale-down reconciliation engine.
//!
//! One pass:
//! - Lists the live runner fleet and orders it newest first
//! - Resets the client cache
//! - Walks the instances in order, skipping those still in their boot
//!   window or busy with a job
//! - De-registers idle runners, then terminates their instances
//!
//! Processing is strictly sequential. A rejected de-registration most likely
//! means the runner just picked up a job, so the pass stops there and leaves
//! every later instance for the next pass. A rejected termination only
//! orphans that instance; the pass moves on.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ghr_id::{InstanceId, OwnerScope, RunnerId};
use ghr_reconcile::{
    classify, find_registration, minimum_running_time_exceeded, sort_newest_first, ReclaimAction,
    ReclaimOutcome,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::actuator::Actuator;
use crate::cache::RunnerClientCache;
use crate::coordinator::CoordinatorApi;
use crate::error::{CoordinatorError, ScaleDownError};
use crate::inventory::{list_runners, ListRunnerFilters, RunnerInstance};
use crate::provider::ComputeProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleDownConfig {
    /// Only runners tagged with this environment are considered.
    pub environment: Option<String>,
    /// Instances younger than this are never reclaimed.
    pub minimum_running_time: Duration,
    /// Runners are registered organization-wide rather than per repository.
    pub enable_org_level: bool,
}

impl Default for ScaleDownConfig {
    fn default() -> Self {
        Self {
            environment: None,
            minimum_running_time: Duration::minutes(
                ghr_reconcile::DEFAULT_MINIMUM_RUNNING_TIME_MINUTES,
            ),
            enable_org_level: false,
        }
    }
}

/// What happened to one instance during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceOutcome {
    pub instance_id: InstanceId,
    #[serde(flatten)]
    pub outcome: ReclaimOutcome,
}

/// Result of a completed pass, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub outcomes: Vec<InstanceOutcome>,
}

impl PassReport {
    fn record(&mut self, instance_id: &InstanceId, outcome: ReclaimOutcome) {
        self.outcomes.push(InstanceOutcome {
            instance_id: instance_id.clone(),
            outcome,
        });
    }

    /// Returns the outcome recorded for an instance.
    pub fn outcome_of(&self, instance_id: &InstanceId) -> Option<&ReclaimOutcome> {
        self.outcomes
            .iter()
            .find(|o| &o.instance_id == instance_id)
            .map(|o| &o.outcome)
    }

    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn terminated(&self) -> usize {
        self.count(|o| matches!(o, ReclaimOutcome::Terminated { .. }))
    }

    pub fn deregistered(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                ReclaimOutcome::Terminated { deregistered: Some(_) }
                    | ReclaimOutcome::Orphaned { deregistered: Some(_) }
            )
        })
    }

    pub fn orphaned(&self) -> usize {
        self.count(|o| matches!(o, ReclaimOutcome::Orphaned { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                ReclaimOutcome::SkippedTooYoung
                    | ReclaimOutcome::SkippedBusy
                    | ReclaimOutcome::SkippedUnresolvedScope
            )
        })
    }

    fn count(&self, pred: impl Fn(&ReclaimOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }
}

/// The scale-down engine.
pub struct ScaleDown {
    provider: Arc<dyn ComputeProvider>,
    actuator: Actuator,
    config: ScaleDownConfig,
}

impl ScaleDown {
    pub fn new(
        provider: Arc<dyn ComputeProvider>,
        coordinator: Arc<dyn CoordinatorApi>,
        config: ScaleDownConfig,
    ) -> Self {
        Self {
            actuator: Actuator::new(provider.clone(), coordinator),
            provider,
            config,
        }
    }

    pub fn config(&self) -> &ScaleDownConfig {
        &self.config
    }

    /// Run one pass against the current time.
    pub async fn run_pass(&self, cache: &mut RunnerClientCache) -> Result<PassReport, ScaleDownError> {
        self.run_pass_at(cache, Utc::now()).await
    }

    /// Run one pass, judging instance age against `now`.
    #[instrument(skip(self, cache), fields(environment = ?self.config.environment))]
    pub async fn run_pass_at(
        &self,
        cache: &mut RunnerClientCache,
        now: DateTime<Utc>,
    ) -> Result<PassReport, ScaleDownError> {
        let filters = self
            .config
            .environment
            .as_deref()
            .map(ListRunnerFilters::environment);
        let mut runners = list_runners(self.provider.as_ref(), filters.as_ref())
            .await
            .map_err(ScaleDownError::Inventory)?;

        let mut report = PassReport::default();
        if runners.is_empty() {
            debug!("No active runners found");
            return Ok(report);
        }

        sort_newest_first(&mut runners, |r| r.launch_time);
        cache.reset();

        for runner in &runners {
            let outcome = self.reconcile_runner(cache, runner, now).await?;
            report.record(&runner.instance_id, outcome);
        }

        info!(
            processed = report.processed(),
            terminated = report.terminated(),
            orphaned = report.orphaned(),
            skipped = report.skipped(),
            "Scale-down pass complete"
        );
        Ok(report)
    }

    async fn reconcile_runner(
        &self,
        cache: &mut RunnerClientCache,
        runner: &RunnerInstance,
        now: DateTime<Utc>,
    ) -> Result<ReclaimOutcome, ScaleDownError> {
        if !minimum_running_time_exceeded(runner.launch_time, now, self.config.minimum_running_time) {
            debug!(
                instance_id = %runner.instance_id,
                runner_type = runner.runner_type_label(),
                "Runner has not reached its minimum running time"
            );
            return Ok(ReclaimOutcome::SkippedTooYoung);
        }

        let scope = match OwnerScope::resolve(
            runner.org.as_deref(),
            runner.repo.as_deref(),
            self.config.enable_org_level,
        ) {
            Ok(scope) => scope,
            Err(e) => {
                warn!(
                    instance_id = %runner.instance_id,
                    error = %e,
                    "Cannot determine runner owner, skipping"
                );
                return Ok(ReclaimOutcome::SkippedUnresolvedScope);
            }
        };

        let coordinator_error = |source: CoordinatorError| ScaleDownError::Coordinator {
            scope: scope.to_string(),
            source,
        };
        let client = cache.get_client(&scope).await.map_err(coordinator_error)?;
        let listing = cache
            .get_runner_listing(&client)
            .await
            .map_err(coordinator_error)?;
        let registration = find_registration(&listing, &runner.instance_id);

        match classify(registration) {
            ReclaimAction::SkipBusy => {
                info!(
                    instance_id = %runner.instance_id,
                    runner_type = runner.runner_type_label(),
                    "Runner is busy, skipping"
                );
                Ok(ReclaimOutcome::SkippedBusy)
            }
            ReclaimAction::DeregisterAndTerminate { runner_id } => {
                if let Err(source) = self.actuator.deregister(&client, runner_id).await {
                    warn!(
                        instance_id = %runner.instance_id,
                        runner_id = %runner_id,
                        error = %source,
                        "Failed to de-register runner, aborting pass"
                    );
                    return Err(ScaleDownError::DeregistrationRace {
                        instance_id: runner.instance_id.clone(),
                        runner_id,
                        source,
                    });
                }
                Ok(self.terminate(runner, Some(runner_id)).await)
            }
            ReclaimAction::TerminateOrphan => {
                info!(
                    instance_id = %runner.instance_id,
                    "Runner has no registration, terminating"
                );
                Ok(self.terminate(runner, None).await)
            }
        }
    }

    async fn terminate(&self, runner: &RunnerInstance, deregistered: Option<RunnerId>) -> ReclaimOutcome {
        match self.actuator.terminate(runner).await {
            Ok(()) => ReclaimOutcome::Terminated { deregistered },
            Err(e) => {
                error!(
                    instance_id = %runner.instance_id,
                    runner_type = runner.runner_type_label(),
                    error = %e,
                    "Failed to terminate runner instance, leaving it orphaned"
                );
                ReclaimOutcome::Orphaned { deregistered }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, outcome: ReclaimOutcome) -> InstanceOutcome {
        InstanceOutcome {
            instance_id: InstanceId::parse(id).unwrap(),
            outcome,
        }
    }

    #[test]
    fn test_report_counters() {
        let report = PassReport {
            outcomes: vec![
                outcome("i-1", ReclaimOutcome::Terminated { deregistered: Some(RunnerId::new(1)) }),
                outcome("i-2", ReclaimOutcome::Terminated { deregistered: None }),
                outcome("i-3", ReclaimOutcome::Orphaned { deregistered: Some(RunnerId::new(3)) }),
                outcome("i-4", ReclaimOutcome::SkippedBusy),
                outcome("i-5", ReclaimOutcome::SkippedTooYoung),
            ],
        };
        assert_eq!(report.processed(), 5);
        assert_eq!(report.terminated(), 2);
        assert_eq!(report.deregistered(), 2);
        assert_eq!(report.orphaned(), 1);
        assert_eq!(report.skipped(), 2);
        assert_eq!(
            report.outcome_of(&InstanceId::parse("i-4").unwrap()),
            Some(&ReclaimOutcome::SkippedBusy)
        );
    }

    #[test]
    fn test_report_serializes_flat_outcomes() {
        let report = PassReport {
            outcomes: vec![outcome(
                "i-1",
                ReclaimOutcome::Terminated { deregistered: Some(RunnerId::new(42)) },
            )],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "outcomes": [
                    { "instance_id": "i-1", "outcome": "terminated", "deregistered": 42 }
                ]
            })
        );
    }

    #[test]
    fn test_default_config() {
        let config = ScaleDownConfig::default();
        assert_eq!(config.minimum_running_time, Duration::minutes(5));
        assert!(!config.enable_org_level);
    }
}
