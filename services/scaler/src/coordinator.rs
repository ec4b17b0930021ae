//! CI coordinator interface and mock implementation.
//!
//! Authentication is two-step: an app-level credential is used to resolve the
//! installation bound to a scope, and an installation-scoped credential is
//! then issued for all runner calls against that scope.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use ghr_id::{InstallationId, OwnerScope, RunnerId, ScopeKey};
use ghr_reconcile::RemoteRegistration;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::CoordinatorError;

/// Bearer credential. Never printed by `Debug`.
#[derive(Clone)]
pub struct AccessToken(SecretString);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Returns the raw token for use in an `Authorization` header.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// An authenticated client bound to one owner scope.
#[derive(Debug, Clone)]
pub struct ScopedClient {
    pub scope: OwnerScope,
    pub installation_id: InstallationId,
    pub token: AccessToken,
}

/// CI coordinator interface.
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    /// Issue an app-level credential.
    async fn app_token(&self) -> Result<AccessToken, CoordinatorError>;

    /// Resolve the installation bound to an organization.
    async fn org_installation(
        &self,
        app_token: &AccessToken,
        org: &str,
    ) -> Result<InstallationId, CoordinatorError>;

    /// Resolve the installation bound to a repository.
    async fn repo_installation(
        &self,
        app_token: &AccessToken,
        owner: &str,
        repo: &str,
    ) -> Result<InstallationId, CoordinatorError>;

    /// Issue a credential scoped to one installation.
    async fn installation_token(
        &self,
        app_token: &AccessToken,
        installation_id: InstallationId,
    ) -> Result<AccessToken, CoordinatorError>;

    /// List every runner registered to a scope, across all pages.
    async fn list_runners(
        &self,
        token: &AccessToken,
        scope: &OwnerScope,
    ) -> Result<Vec<RemoteRegistration>, CoordinatorError>;

    /// Remove a runner registration. Removing an unknown runner succeeds.
    async fn delete_runner(
        &self,
        token: &AccessToken,
        scope: &OwnerScope,
        runner_id: RunnerId,
    ) -> Result<(), CoordinatorError>;
}

// =============================================================================
// Mock
// =============================================================================

/// A call observed by [`MockCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorCall {
    AppToken,
    OrgInstallation { org: String },
    RepoInstallation { owner: String, repo: String },
    InstallationToken { installation_id: InstallationId },
    ListRunners { scope: ScopeKey },
    DeleteRunner { scope: ScopeKey, runner_id: RunnerId },
}

/// In-memory coordinator for testing and development.
pub struct MockCoordinator {
    runners: Mutex<HashMap<ScopeKey, Vec<RemoteRegistration>>>,
    installations: Mutex<HashMap<String, InstallationId>>,
    calls: Mutex<Vec<CoordinatorCall>>,
    failing_deletes: Mutex<HashSet<RunnerId>>,
    fail_auth: AtomicBool,
    installation_counter: AtomicU64,
}

impl MockCoordinator {
    pub fn new() -> Self {
        Self {
            runners: Mutex::new(HashMap::new()),
            installations: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failing_deletes: Mutex::new(HashSet::new()),
            fail_auth: AtomicBool::new(false),
            installation_counter: AtomicU64::new(1000),
        }
    }

    /// Register a runner under a scope.
    pub async fn register(&self, scope: &OwnerScope, registration: RemoteRegistration) {
        self.runners
            .lock()
            .await
            .entry(scope.key())
            .or_default()
            .push(registration);
    }

    /// Flip the busy flag of a registered runner.
    pub async fn set_busy(&self, runner_id: RunnerId, busy: bool) {
        for listing in self.runners.lock().await.values_mut() {
            for r in listing.iter_mut().filter(|r| r.id == runner_id) {
                r.busy = busy;
            }
        }
    }

    /// Make deletion of this runner fail as if it had just picked up a job.
    pub async fn fail_delete_of(&self, runner_id: RunnerId) {
        self.failing_deletes.lock().await.insert(runner_id);
    }

    /// Make app-level authentication fail.
    pub fn fail_auth(&self, fail: bool) {
        self.fail_auth.store(fail, Ordering::SeqCst);
    }

    /// Returns every recorded call, oldest first.
    pub async fn calls(&self) -> Vec<CoordinatorCall> {
        self.calls.lock().await.clone()
    }

    /// Returns the runner ids passed to delete calls, in call order.
    pub async fn deleted(&self) -> Vec<RunnerId> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                CoordinatorCall::DeleteRunner { runner_id, .. } => Some(*runner_id),
                _ => None,
            })
            .collect()
    }

    /// Count recorded calls matching a predicate.
    pub async fn count(&self, pred: impl Fn(&CoordinatorCall) -> bool) -> usize {
        self.calls.lock().await.iter().filter(|&c| pred(c)).count()
    }

    async fn record(&self, call: CoordinatorCall) {
        self.calls.lock().await.push(call);
    }

    async fn installation_for(&self, key: String) -> InstallationId {
        let mut installations = self.installations.lock().await;
        *installations.entry(key).or_insert_with(|| {
            InstallationId::new(self.installation_counter.fetch_add(1, Ordering::SeqCst))
        })
    }
}

impl Default for MockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinatorApi for MockCoordinator {
    async fn app_token(&self) -> Result<AccessToken, CoordinatorError> {
        self.record(CoordinatorCall::AppToken).await;
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Auth {
                stage: "app token",
                message: "[MOCK] bad credentials".to_string(),
            });
        }
        Ok(AccessToken::new("mock-app-token"))
    }

    async fn org_installation(
        &self,
        _app_token: &AccessToken,
        org: &str,
    ) -> Result<InstallationId, CoordinatorError> {
        self.record(CoordinatorCall::OrgInstallation {
            org: org.to_string(),
        })
        .await;
        Ok(self.installation_for(org.to_string()).await)
    }

    async fn repo_installation(
        &self,
        _app_token: &AccessToken,
        owner: &str,
        repo: &str,
    ) -> Result<InstallationId, CoordinatorError> {
        self.record(CoordinatorCall::RepoInstallation {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
        .await;
        Ok(self.installation_for(format!("{owner}/{repo}")).await)
    }

    async fn installation_token(
        &self,
        _app_token: &AccessToken,
        installation_id: InstallationId,
    ) -> Result<AccessToken, CoordinatorError> {
        self.record(CoordinatorCall::InstallationToken { installation_id })
            .await;
        Ok(AccessToken::new(format!("mock-installation-token-{installation_id}")))
    }

    async fn list_runners(
        &self,
        _token: &AccessToken,
        scope: &OwnerScope,
    ) -> Result<Vec<RemoteRegistration>, CoordinatorError> {
        self.record(CoordinatorCall::ListRunners { scope: scope.key() })
            .await;
        Ok(self
            .runners
            .lock()
            .await
            .get(&scope.key())
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_runner(
        &self,
        _token: &AccessToken,
        scope: &OwnerScope,
        runner_id: RunnerId,
    ) -> Result<(), CoordinatorError> {
        self.record(CoordinatorCall::DeleteRunner {
            scope: scope.key(),
            runner_id,
        })
        .await;

        if self.failing_deletes.lock().await.contains(&runner_id) {
            return Err(CoordinatorError::Http {
                status: Some(422),
                message: format!("[MOCK] runner {runner_id} is still running a job"),
            });
        }

        if let Some(listing) = self.runners.lock().await.get_mut(&scope.key()) {
            listing.retain(|r| r.id != runner_id);
        }
        info!(scope = %scope, runner_id = %runner_id, "[MOCK] Deleted runner");
        Ok(())
    }
}
