//! Error types for the scaler.

use ghr_id::{InstanceId, RunnerId};
use thiserror::Error;

/// Compute provider (instance listing, termination, launch) failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The referenced resource does not exist (already terminated or never
    /// existed).
    #[error("not found: {0}")]
    NotFound(String),

    /// The provider rejected the request.
    #[error("provider rejected request ({code}): {message}")]
    Api { code: String, message: String },

    /// The request never produced a provider response.
    #[error("provider transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// CI coordinator failures.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Credential issuance or installation resolution failed.
    #[error("authentication failed during {stage}: {message}")]
    Auth {
        stage: &'static str,
        message: String,
    },

    /// The coordinator returned an unexpected status, or the request failed
    /// before a status was received.
    #[error("coordinator request failed (status {status:?}): {message}")]
    Http { status: Option<u16>, message: String },

    /// A response body could not be decoded.
    #[error("invalid coordinator response: {0}")]
    Decode(String),
}

impl CoordinatorError {
    /// Returns the HTTP status, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Reasons a scale-down pass stops early.
#[derive(Debug, Error)]
pub enum ScaleDownError {
    /// The fleet could not be listed; nothing can be decided without it.
    #[error("failed to list runner instances: {0}")]
    Inventory(#[source] ProviderError),

    /// Authenticating against, or listing runners for, a scope failed.
    #[error("coordinator unavailable for scope {scope}: {source}")]
    Coordinator {
        scope: String,
        #[source]
        source: CoordinatorError,
    },

    /// De-registration was rejected, most likely because the runner picked up
    /// a job after the listing was fetched.
    #[error("de-registration of runner {runner_id} for instance {instance_id} rejected: {source}")]
    DeregistrationRace {
        instance_id: InstanceId,
        runner_id: RunnerId,
        #[source]
        source: CoordinatorError,
    },
}

impl ScaleDownError {
    /// Returns true for the expected de-registration race, which is not a
    /// fault and should not be escalated.
    pub fn is_race(&self) -> bool {
        matches!(self, Self::DeregistrationRace { .. })
    }
}

/// Runner creation failures.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// No available image matched the runner type's image filter.
    #[error("could not find a matching AMI for filter {filter}")]
    AmiNotFound { filter: String },

    /// No subnet is configured to launch into.
    #[error("no subnets configured")]
    NoSubnets,

    /// No launch template is configured for the runner's operating system.
    #[error("no launch template configured for {os}")]
    NoLaunchTemplate { os: String },

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Storing the runner configuration failed after launch.
    #[error("failed to store parameter {name}: {source}")]
    Parameter {
        name: String,
        #[source]
        source: ProviderError,
    },
}
