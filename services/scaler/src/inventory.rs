//! Fleet inventory: the runner instances currently alive at the provider.

use chrono::{DateTime, Utc};
use ghr_id::{InstanceId, RunnerId};
use tracing::{debug, instrument};

use crate::error::ProviderError;
use crate::provider::{ComputeProvider, Filter, ProviderInstance};

/// Tag marking an instance as belonging to the runner fleet.
pub const TAG_APPLICATION: &str = "Application";
/// Value of [`TAG_APPLICATION`] on runner instances.
pub const RUNNER_APPLICATION: &str = "github-action-runner";
pub const TAG_ENVIRONMENT: &str = "Environment";
pub const TAG_REPO: &str = "Repo";
pub const TAG_ORG: &str = "Org";
pub const TAG_RUNNER_TYPE: &str = "RunnerType";
/// Optional tag carrying the coordinator runner id, when the instance
/// recorded it at registration time.
pub const TAG_RUNNER_ID: &str = "GithubRunnerId";

/// States an instance can be reclaimed from.
const LIVE_STATES: [&str; 2] = ["running", "pending"];

/// One runner instance, as observed at the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerInstance {
    pub instance_id: InstanceId,
    pub launch_time: Option<DateTime<Utc>>,
    pub repo: Option<String>,
    pub org: Option<String>,
    pub runner_type: Option<String>,
    pub runner_id: Option<RunnerId>,
}

impl RunnerInstance {
    /// Runner type for log fields, `unknown` when untagged.
    pub fn runner_type_label(&self) -> &str {
        self.runner_type.as_deref().unwrap_or("unknown")
    }
}

impl From<ProviderInstance> for RunnerInstance {
    fn from(instance: ProviderInstance) -> Self {
        let tag = |key: &str| instance.tag(key).map(str::to_string);
        Self {
            repo: tag(TAG_REPO),
            org: tag(TAG_ORG),
            runner_type: tag(TAG_RUNNER_TYPE),
            runner_id: instance.tag(TAG_RUNNER_ID).and_then(|v| v.parse().ok()),
            launch_time: instance.launch_time,
            instance_id: instance.instance_id,
        }
    }
}

/// Optional narrowing of the inventory query. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRunnerFilters {
    pub environment: Option<String>,
    pub repo_name: Option<String>,
    pub org_name: Option<String>,
}

impl ListRunnerFilters {
    /// Filters for a single environment.
    pub fn environment(environment: impl Into<String>) -> Self {
        Self {
            environment: Some(environment.into()),
            ..Self::default()
        }
    }

    fn to_provider_filters(filters: Option<&Self>) -> Vec<Filter> {
        let mut out = vec![
            Filter::tag(TAG_APPLICATION, RUNNER_APPLICATION),
            Filter::new(
                "instance-state-name",
                LIVE_STATES.iter().map(|s| s.to_string()).collect(),
            ),
        ];
        if let Some(f) = filters {
            if let Some(environment) = &f.environment {
                out.push(Filter::tag(TAG_ENVIRONMENT, environment.clone()));
            }
            if let Some(repo) = &f.repo_name {
                out.push(Filter::tag(TAG_REPO, repo.clone()));
            }
            if let Some(org) = &f.org_name {
                out.push(Filter::tag(TAG_ORG, org.clone()));
            }
        }
        out
    }
}

/// List live runner instances. The result is unordered.
#[instrument(skip(provider))]
pub async fn list_runners(
    provider: &dyn ComputeProvider,
    filters: Option<&ListRunnerFilters>,
) -> Result<Vec<RunnerInstance>, ProviderError> {
    let provider_filters = ListRunnerFilters::to_provider_filters(filters);
    let instances = provider.describe_instances(&provider_filters).await?;
    debug!(count = instances.len(), "Listed runner instances");

    Ok(instances.into_iter().map(RunnerInstance::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockComputeProvider, ProviderCall, Tag};

    fn runner(id: &str, state: &str, tags: &[(&str, &str)]) -> ProviderInstance {
        let mut all = vec![Tag::new(TAG_APPLICATION, RUNNER_APPLICATION)];
        all.extend(tags.iter().map(|(k, v)| Tag::new(*k, *v)));
        ProviderInstance {
            instance_id: InstanceId::parse(id).unwrap(),
            launch_time: Some(Utc::now()),
            state: state.to_string(),
            tags: all,
        }
    }

    #[test]
    fn test_record_reads_tags() {
        let record = RunnerInstance::from(runner(
            "i-1",
            "running",
            &[
                (TAG_REPO, "acme/web"),
                (TAG_RUNNER_TYPE, "linux.2xlarge"),
                (TAG_RUNNER_ID, "42"),
            ],
        ));
        assert_eq!(record.repo.as_deref(), Some("acme/web"));
        assert_eq!(record.org, None);
        assert_eq!(record.runner_type_label(), "linux.2xlarge");
        assert_eq!(record.runner_id, Some(RunnerId::new(42)));
    }

    #[test]
    fn test_unparsable_runner_id_is_ignored() {
        let record = RunnerInstance::from(runner("i-1", "running", &[(TAG_RUNNER_ID, "n/a")]));
        assert_eq!(record.runner_id, None);
        assert_eq!(record.runner_type_label(), "unknown");
    }

    #[test]
    fn test_filters_always_restrict_to_live_runners() {
        let filters = ListRunnerFilters::to_provider_filters(None);
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0], Filter::tag(TAG_APPLICATION, RUNNER_APPLICATION));
        assert_eq!(
            filters[1].values,
            vec!["running".to_string(), "pending".to_string()]
        );
    }

    #[tokio::test]
    async fn test_list_runners_applies_optional_filters() {
        let provider = MockComputeProvider::new();
        provider
            .add_instance(runner("i-1", "running", &[(TAG_ENVIRONMENT, "prod"), (TAG_ORG, "acme")]))
            .await;
        provider
            .add_instance(runner("i-2", "pending", &[(TAG_ENVIRONMENT, "prod"), (TAG_ORG, "other")]))
            .await;
        provider
            .add_instance(runner("i-3", "stopped", &[(TAG_ENVIRONMENT, "prod"), (TAG_ORG, "acme")]))
            .await;
        provider
            .add_instance(runner("i-4", "running", &[(TAG_ENVIRONMENT, "dev"), (TAG_ORG, "acme")]))
            .await;

        let filters = ListRunnerFilters {
            environment: Some("prod".to_string()),
            org_name: Some("acme".to_string()),
            ..Default::default()
        };
        let found = list_runners(&provider, Some(&filters)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].instance_id.as_str(), "i-1");

        let everything = list_runners(&provider, None).await.unwrap();
        assert_eq!(everything.len(), 3);

        let calls = provider.calls().await;
        assert!(matches!(&calls[0], ProviderCall::DescribeInstances { filters } if filters.len() == 4));
    }

    #[tokio::test]
    async fn test_list_runners_propagates_provider_errors() {
        let provider = MockComputeProvider::new();
        provider.fail_describe(true);

        let err = list_runners(&provider, None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }
}
