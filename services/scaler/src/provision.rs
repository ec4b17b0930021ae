//! Runner creation path: image lookup and instance launch.

use std::sync::Arc;

use ghr_id::InstanceId;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::error::ProvisionError;
use crate::inventory::{
    RUNNER_APPLICATION, TAG_APPLICATION, TAG_ENVIRONMENT, TAG_ORG, TAG_REPO, TAG_RUNNER_TYPE,
};
use crate::provider::{
    BlockDevice, ComputeProvider, Filter, ImageQuery, LaunchRequest, LaunchTemplate,
    ParameterStore, ParameterType, Tag,
};

/// Image owner searched when none is given.
pub const DEFAULT_AMI_OWNER: &str = "amazon";

const ROOT_DEVICE_NAME: &str = "/dev/xvda";
const ROOT_VOLUME_TYPE: &str = "gp3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerOs {
    Linux,
    Windows,
}

impl std::fmt::Display for RunnerOs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// A class of runner instance, as configured for the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerType {
    pub instance_type: String,
    pub os: RunnerOs,
    /// Image name pattern; `*` matches any run of characters.
    pub ami_filter: String,
    pub max_available: u32,
    pub min_available: u32,
    /// Root volume size in GiB.
    pub disk_size: u32,
    #[serde(rename = "runnerTypeName")]
    pub runner_type_name: String,
}

/// One runner launch request.
#[derive(Debug, Clone)]
pub struct RunnerInputParameters {
    /// Opaque configuration handed to the runner at boot.
    pub runner_config: String,
    pub environment: String,
    pub repo_name: Option<String>,
    pub org_name: Option<String>,
    pub runner_type: RunnerType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionConfig {
    pub subnet_ids: Vec<String>,
    pub launch_template_linux: Option<LaunchTemplate>,
    pub launch_template_windows: Option<LaunchTemplate>,
}

impl ProvisionConfig {
    fn launch_template(&self, os: RunnerOs) -> Result<&LaunchTemplate, ProvisionError> {
        let template = match os {
            RunnerOs::Linux => self.launch_template_linux.as_ref(),
            RunnerOs::Windows => self.launch_template_windows.as_ref(),
        };
        template.ok_or(ProvisionError::NoLaunchTemplate { os: os.to_string() })
    }

    fn random_subnet(&self) -> Result<&str, ProvisionError> {
        self.subnet_ids
            .choose(&mut rand::rng())
            .map(String::as_str)
            .ok_or(ProvisionError::NoSubnets)
    }
}

/// Find the newest available image whose name matches `filter`.
#[instrument(skip(provider))]
pub async fn find_ami_id(
    provider: &dyn ComputeProvider,
    filter: &str,
    owner: &str,
) -> Result<String, ProvisionError> {
    let query = ImageQuery {
        owners: vec![owner.to_string()],
        filters: vec![
            Filter::new("name", vec![filter.to_string()]),
            Filter::new("state", vec!["available".to_string()]),
        ],
    };
    let mut images = provider.describe_images(&query).await?;
    // Newest first; undated images last.
    images.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));

    let latest = images.into_iter().next().ok_or_else(|| ProvisionError::AmiNotFound {
        filter: filter.to_string(),
    })?;
    debug!(image_id = %latest.image_id, name = %latest.name, "Found latest image");
    Ok(latest.image_id)
}

/// Launch one runner and store its configuration for each launched instance.
#[instrument(skip_all, fields(runner_type = %params.runner_type.runner_type_name))]
pub async fn create_runner(
    provider: Arc<dyn ComputeProvider>,
    store: Arc<dyn ParameterStore>,
    config: &ProvisionConfig,
    params: &RunnerInputParameters,
) -> Result<Vec<InstanceId>, ProvisionError> {
    let runner_type = &params.runner_type;
    let subnet_id = config.random_subnet()?;
    let launch_template = config.launch_template(runner_type.os)?;

    let image_id = match find_ami_id(provider.as_ref(), &runner_type.ami_filter, DEFAULT_AMI_OWNER).await {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "Runner not created");
            return Err(e);
        }
    };

    let request = LaunchRequest {
        image_id,
        instance_type: runner_type.instance_type.clone(),
        launch_template: launch_template.clone(),
        subnet_id: subnet_id.to_string(),
        block_device: BlockDevice {
            device_name: ROOT_DEVICE_NAME.to_string(),
            volume_size_gib: runner_type.disk_size,
            volume_type: ROOT_VOLUME_TYPE.to_string(),
            encrypted: true,
            delete_on_termination: true,
        },
        tags: runner_tags(params),
        count: 1,
    };
    let launched = provider.run_instances(&request).await?;
    let ids: Vec<InstanceId> = launched.into_iter().map(|i| i.instance_id).collect();
    info!(
        instances = %ids.iter().map(InstanceId::as_str).collect::<Vec<_>>().join(","),
        subnet_id,
        "Created runner instances"
    );

    for id in &ids {
        let name = format!("{}-{}", params.environment, id);
        store
            .put_parameter(&name, &params.runner_config, ParameterType::SecureString)
            .await
            .map_err(|source| ProvisionError::Parameter { name, source })?;
    }
    Ok(ids)
}

fn runner_tags(params: &RunnerInputParameters) -> Vec<Tag> {
    let mut tags = vec![Tag::new(TAG_APPLICATION, RUNNER_APPLICATION)];
    match (&params.org_name, &params.repo_name) {
        (Some(org), _) => tags.push(Tag::new(TAG_ORG, org.clone())),
        (None, Some(repo)) => tags.push(Tag::new(TAG_REPO, repo.clone())),
        (None, None) => {}
    }
    tags.push(Tag::new(TAG_RUNNER_TYPE, params.runner_type.runner_type_name.clone()));
    tags.push(Tag::new(TAG_ENVIRONMENT, params.environment.clone()));
    tags
}
