//! Lifecycle actuator: the two mutating calls a pass can make.

use std::sync::Arc;

use ghr_id::RunnerId;
use tracing::{debug, info};

use crate::coordinator::{CoordinatorApi, ScopedClient};
use crate::error::{CoordinatorError, ProviderError};
use crate::inventory::RunnerInstance;
use crate::provider::ComputeProvider;

#[derive(Clone)]
pub struct Actuator {
    provider: Arc<dyn ComputeProvider>,
    coordinator: Arc<dyn CoordinatorApi>,
}

impl Actuator {
    pub fn new(provider: Arc<dyn ComputeProvider>, coordinator: Arc<dyn CoordinatorApi>) -> Self {
        Self {
            provider,
            coordinator,
        }
    }

    /// Terminate an instance. An instance the provider no longer knows is
    /// already gone, which counts as success.
    pub async fn terminate(&self, instance: &RunnerInstance) -> Result<(), ProviderError> {
        match self
            .provider
            .terminate_instances(std::slice::from_ref(&instance.instance_id))
            .await
        {
            Ok(()) => {
                info!(
                    instance_id = %instance.instance_id,
                    runner_type = instance.runner_type_label(),
                    "Runner instance terminated"
                );
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(instance_id = %instance.instance_id, "Runner instance already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a runner registration from the client's scope.
    pub async fn deregister(
        &self,
        client: &ScopedClient,
        runner_id: RunnerId,
    ) -> Result<(), CoordinatorError> {
        self.coordinator
            .delete_runner(&client.token, &client.scope, runner_id)
            .await?;
        info!(scope = %client.scope, runner_id = %runner_id, "Runner de-registered");
        Ok(())
    }
}
