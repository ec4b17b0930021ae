//! Compute provider and parameter store interfaces, with mock implementations.
//!
//! The provider interface abstracts the handful of calls the scaler makes:
//! - Describing tagged instances
//! - Terminating instances
//! - Launching instances and finding images (creation path)
//!
//! Mocks record every call so tests can assert on exact call sequences.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ghr_id::InstanceId;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ProviderError;

/// Provider query filter, e.g. `tag:Environment = [prod]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Filter on a single tag value.
    pub fn tag(key: &str, value: impl Into<String>) -> Self {
        Self::new(format!("tag:{key}"), vec![value.into()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An instance as described by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInstance {
    pub instance_id: InstanceId,
    pub launch_time: Option<DateTime<Utc>>,
    /// Lifecycle state name (`pending`, `running`, `terminated`, ...).
    pub state: String,
    pub tags: Vec<Tag>,
}

impl ProviderInstance {
    /// Returns the value of a tag, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// Launch template reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchTemplate {
    pub name: String,
    pub version: String,
}

/// Root volume definition for a launched instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub device_name: String,
    pub volume_size_gib: u32,
    pub volume_type: String,
    pub encrypted: bool,
    pub delete_on_termination: bool,
}

/// Request to launch instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub image_id: String,
    pub instance_type: String,
    pub launch_template: LaunchTemplate,
    pub subnet_id: String,
    pub block_device: BlockDevice,
    pub tags: Vec<Tag>,
    pub count: u32,
}

/// Image lookup query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageQuery {
    pub owners: Vec<String>,
    pub filters: Vec<Filter>,
}

/// A machine image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub image_id: String,
    pub name: String,
    pub state: String,
    pub creation_date: Option<DateTime<Utc>>,
}

/// Compute provider interface.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Describe all instances matching every filter.
    async fn describe_instances(&self, filters: &[Filter]) -> Result<Vec<ProviderInstance>, ProviderError>;

    /// Terminate instances. Terminating an already-terminated instance
    /// succeeds; an unknown handle yields [`ProviderError::NotFound`].
    async fn terminate_instances(&self, ids: &[InstanceId]) -> Result<(), ProviderError>;

    /// Launch instances.
    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<ProviderInstance>, ProviderError>;

    /// Describe images, in no particular order.
    async fn describe_images(&self, query: &ImageQuery) -> Result<Vec<Image>, ProviderError>;
}

/// Parameter value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    String,
    SecureString,
}

/// Parameter store interface.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn put_parameter(
        &self,
        name: &str,
        value: &str,
        parameter_type: ParameterType,
    ) -> Result<(), ProviderError>;
}

// =============================================================================
// Mocks
// =============================================================================

/// A call observed by [`MockComputeProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    DescribeInstances { filters: Vec<Filter> },
    TerminateInstances { ids: Vec<InstanceId> },
    RunInstances { request: LaunchRequest },
    DescribeImages { query: ImageQuery },
}

/// In-memory compute provider for testing and development.
pub struct MockComputeProvider {
    instances: Mutex<Vec<ProviderInstance>>,
    images: Mutex<Vec<Image>>,
    calls: Mutex<Vec<ProviderCall>>,
    failing_terminations: Mutex<HashSet<InstanceId>>,
    fail_describe: AtomicBool,
    launch_counter: AtomicU64,
}

impl MockComputeProvider {
    /// Create an empty mock provider.
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(Vec::new()),
            images: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            failing_terminations: Mutex::new(HashSet::new()),
            fail_describe: AtomicBool::new(false),
            launch_counter: AtomicU64::new(0),
        }
    }

    /// Add an instance to the fleet.
    pub async fn add_instance(&self, instance: ProviderInstance) {
        self.instances.lock().await.push(instance);
    }

    /// Add an image to the catalog.
    pub async fn add_image(&self, image: Image) {
        self.images.lock().await.push(image);
    }

    /// Make termination of this instance fail.
    pub async fn fail_termination_of(&self, id: &InstanceId) {
        self.failing_terminations.lock().await.insert(id.clone());
    }

    /// Make every describe-instances call fail.
    pub fn fail_describe(&self, fail: bool) {
        self.fail_describe.store(fail, Ordering::SeqCst);
    }

    /// Returns every recorded call, oldest first.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().await.clone()
    }

    /// Returns the handles passed to terminate calls, in call order.
    pub async fn terminated(&self) -> Vec<InstanceId> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                ProviderCall::TerminateInstances { ids } => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Returns the current state of an instance.
    pub async fn state_of(&self, id: &InstanceId) -> Option<String> {
        self.instances
            .lock()
            .await
            .iter()
            .find(|i| &i.instance_id == id)
            .map(|i| i.state.clone())
    }

    fn next_instance_id(&self) -> Result<InstanceId, ProviderError> {
        let counter = self.launch_counter.fetch_add(1, Ordering::SeqCst);
        InstanceId::parse(&format!("i-mock{:012x}", counter))
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }
}

impl Default for MockComputeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComputeProvider for MockComputeProvider {
    async fn describe_instances(&self, filters: &[Filter]) -> Result<Vec<ProviderInstance>, ProviderError> {
        self.calls.lock().await.push(ProviderCall::DescribeInstances {
            filters: filters.to_vec(),
        });

        if self.fail_describe.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("[MOCK] describe failed".to_string()));
        }

        let instances = self.instances.lock().await;
        let matched: Vec<_> = instances
            .iter()
            .filter(|i| filters.iter().all(|f| instance_matches(i, f)))
            .cloned()
            .collect();
        debug!(matched = matched.len(), "[MOCK] Described instances");
        Ok(matched)
    }

    async fn terminate_instances(&self, ids: &[InstanceId]) -> Result<(), ProviderError> {
        self.calls.lock().await.push(ProviderCall::TerminateInstances { ids: ids.to_vec() });

        let failing = self.failing_terminations.lock().await;
        if let Some(id) = ids.iter().find(|id| failing.contains(*id)) {
            return Err(ProviderError::Api {
                code: "UnauthorizedOperation".to_string(),
                message: format!("[MOCK] termination of {id} rejected"),
            });
        }

        let mut instances = self.instances.lock().await;
        for id in ids {
            let Some(instance) = instances.iter_mut().find(|i| &i.instance_id == id) else {
                return Err(ProviderError::NotFound(id.to_string()));
            };
            info!(instance_id = %id, "[MOCK] Terminating instance");
            instance.state = "terminated".to_string();
        }
        Ok(())
    }

    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<ProviderInstance>, ProviderError> {
        self.calls.lock().await.push(ProviderCall::RunInstances {
            request: request.clone(),
        });

        let mut launched = Vec::new();
        for _ in 0..request.count {
            launched.push(ProviderInstance {
                instance_id: self.next_instance_id()?,
                launch_time: Some(Utc::now()),
                state: "pending".to_string(),
                tags: request.tags.clone(),
            });
        }
        self.instances.lock().await.extend(launched.iter().cloned());
        Ok(launched)
    }

    async fn describe_images(&self, query: &ImageQuery) -> Result<Vec<Image>, ProviderError> {
        self.calls.lock().await.push(ProviderCall::DescribeImages {
            query: query.clone(),
        });

        let images = self.images.lock().await;
        Ok(images
            .iter()
            .filter(|img| query.filters.iter().all(|f| image_matches(img, f)))
            .cloned()
            .collect())
    }
}

fn instance_matches(instance: &ProviderInstance, filter: &Filter) -> bool {
    if filter.name == "instance-state-name" {
        return filter.values.contains(&instance.state);
    }
    match filter.name.strip_prefix("tag:") {
        Some(key) => instance
            .tag(key)
            .is_some_and(|v| filter.values.iter().any(|want| want == v)),
        None => true,
    }
}

fn image_matches(image: &Image, filter: &Filter) -> bool {
    match filter.name.as_str() {
        "name" => filter.values.iter().any(|p| wildcard_match(p, &image.name)),
        "state" => filter.values.contains(&image.state),
        _ => true,
    }
}

/// Match `value` against a pattern where `*` matches any run of characters.
fn wildcard_match(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == value;
    }

    let mut rest = value;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            let Some(stripped) = rest.strip_prefix(part) else {
                return false;
            };
            rest = stripped;
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            let Some(pos) = rest.find(part) else {
                return false;
            };
            rest = &rest[pos + part.len()..];
        }
    }
    true
}

/// In-memory parameter store.
#[derive(Default)]
pub struct MockParameterStore {
    parameters: Mutex<Vec<(String, String, ParameterType)>>,
    fail_puts: AtomicBool,
}

impl MockParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every put fail.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Returns the stored parameters, oldest first.
    pub async fn parameters(&self) -> Vec<(String, String, ParameterType)> {
        self.parameters.lock().await.clone()
    }
}

#[async_trait]
impl ParameterStore for MockParameterStore {
    async fn put_parameter(
        &self,
        name: &str,
        value: &str,
        parameter_type: ParameterType,
    ) -> Result<(), ProviderError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                code: "AccessDeniedException".to_string(),
                message: format!("[MOCK] put {name} rejected"),
            });
        }
        self.parameters
            .lock()
            .await
            .push((name.to_string(), value.to_string(), parameter_type));
        Ok(())
    }
}
