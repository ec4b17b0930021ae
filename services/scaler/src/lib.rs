//! Scale-down reconciliation for self-hosted GitHub Actions runner fleets.
//!
//! Each pass lists the runner instances alive at the compute provider,
//! matches them against the runners registered with GitHub, and reclaims
//! the idle ones: de-registration first, then termination. Busy runners and
//! instances still inside their minimum running time are left alone.
//!
//! The collaborators are traits ([`provider::ComputeProvider`],
//! [`provider::ParameterStore`], [`coordinator::CoordinatorApi`]) with
//! in-memory mocks next to each; [`github::GitHubApi`] is the REST adapter.

pub mod actuator;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod github;
pub mod inventory;
pub mod provider;
pub mod provision;
pub mod scale_down;
pub mod worker;

pub use actuator::Actuator;
pub use cache::RunnerClientCache;
pub use config::ScalerConfig;
pub use coordinator::{AccessToken, CoordinatorApi, ScopedClient};
pub use error::{CoordinatorError, ProviderError, ProvisionError, ScaleDownError};
pub use github::{AppCredentials, GitHubApi};
pub use inventory::{list_runners, ListRunnerFilters, RunnerInstance};
pub use provider::{ComputeProvider, ParameterStore};
pub use provision::{create_runner, find_ami_id, ProvisionConfig, RunnerInputParameters, RunnerType};
pub use scale_down::{InstanceOutcome, PassReport, ScaleDown, ScaleDownConfig};
pub use worker::ScaleDownWorker;
