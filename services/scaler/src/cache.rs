//! Per-pass memoization of authenticated coordinator clients and runner
//! listings.
//!
//! Registration and busy state is only valid momentarily, so nothing here may
//! outlive a reconciliation pass. The engine calls [`RunnerClientCache::reset`]
//! exactly once at the start of every pass; within a pass each distinct scope
//! key costs at most one authentication and one listing fetch.

use std::collections::HashMap;
use std::sync::Arc;

use ghr_id::{OwnerScope, ScopeKey, ScopeKind};
use ghr_reconcile::RemoteRegistration;
use tracing::debug;

use crate::coordinator::{CoordinatorApi, ScopedClient};
use crate::error::CoordinatorError;

pub struct RunnerClientCache {
    api: Arc<dyn CoordinatorApi>,
    clients: HashMap<ScopeKey, ScopedClient>,
    listings: HashMap<ScopeKey, Arc<[RemoteRegistration]>>,
}

impl RunnerClientCache {
    pub fn new(api: Arc<dyn CoordinatorApi>) -> Self {
        Self {
            api,
            clients: HashMap::new(),
            listings: HashMap::new(),
        }
    }

    /// Returns the authenticated client for a scope, authenticating on miss.
    ///
    /// Authentication is two-step: an app credential resolves the scope's
    /// installation, which then issues the installation credential.
    pub async fn get_client(&mut self, scope: &OwnerScope) -> Result<ScopedClient, CoordinatorError> {
        let key = scope.key();
        if let Some(client) = self.clients.get(&key) {
            debug!(scope = %key, "Client cache hit");
            return Ok(client.clone());
        }
        debug!(scope = %key, "Client cache miss, authenticating");

        let app_token = self.api.app_token().await?;
        let installation_id = match scope.kind() {
            ScopeKind::Organization => {
                self.api
                    .org_installation(&app_token, scope.owner_login())
                    .await?
            }
            ScopeKind::Repository => {
                self.api
                    .repo_installation(&app_token, scope.owner_login(), scope.repository_name())
                    .await?
            }
        };
        let token = self
            .api
            .installation_token(&app_token, installation_id)
            .await?;

        let client = ScopedClient {
            scope: scope.clone(),
            installation_id,
            token,
        };
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    /// Returns the complete runner listing for the client's scope, fetching
    /// it on miss.
    pub async fn get_runner_listing(
        &mut self,
        client: &ScopedClient,
    ) -> Result<Arc<[RemoteRegistration]>, CoordinatorError> {
        let key = client.scope.key();
        if let Some(listing) = self.listings.get(&key) {
            debug!(scope = %key, runners = listing.len(), "Runner listing cache hit");
            return Ok(Arc::clone(listing));
        }

        let listing: Arc<[RemoteRegistration]> = self
            .api
            .list_runners(&client.token, &client.scope)
            .await?
            .into();
        debug!(scope = %key, runners = listing.len(), "Runner listing cache miss, fetched");

        self.listings.insert(key, Arc::clone(&listing));
        Ok(listing)
    }

    /// Forget every client and listing.
    pub fn reset(&mut self) {
        debug!(
            clients = self.clients.len(),
            listings = self.listings.len(),
            "Resetting runner client cache"
        );
        self.clients.clear();
        self.listings.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty() && self.listings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use ghr_id::RunnerId;

    use super::*;
    use crate::coordinator::{CoordinatorCall, MockCoordinator};

    fn registration(id: u64, name: &str) -> RemoteRegistration {
        RemoteRegistration {
            id: RunnerId::new(id),
            name: name.to_string(),
            busy: false,
            status: Some("online".to_string()),
            labels: vec![],
        }
    }

    #[tokio::test]
    async fn test_client_is_authenticated_once_per_scope() {
        let coordinator = Arc::new(MockCoordinator::new());
        let mut cache = RunnerClientCache::new(coordinator.clone());
        let scope = OwnerScope::repository("acme", "web").unwrap();

        let first = cache.get_client(&scope).await.unwrap();
        let second = cache.get_client(&scope).await.unwrap();
        assert_eq!(first.installation_id, second.installation_id);

        assert_eq!(
            coordinator.calls().await,
            vec![
                CoordinatorCall::AppToken,
                CoordinatorCall::RepoInstallation {
                    owner: "acme".to_string(),
                    repo: "web".to_string(),
                },
                CoordinatorCall::InstallationToken {
                    installation_id: first.installation_id,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_org_scope_resolves_org_installation() {
        let coordinator = Arc::new(MockCoordinator::new());
        let mut cache = RunnerClientCache::new(coordinator.clone());
        let scope = OwnerScope::organization("acme").unwrap();

        cache.get_client(&scope).await.unwrap();
        let org_lookups = coordinator
            .count(|c| matches!(c, CoordinatorCall::OrgInstallation { .. }))
            .await;
        assert_eq!(org_lookups, 1);
    }

    #[tokio::test]
    async fn test_listing_is_fetched_once_until_reset() {
        let coordinator = Arc::new(MockCoordinator::new());
        let scope = OwnerScope::repository("acme", "web").unwrap();
        coordinator.register(&scope, registration(1, "i-1")).await;
        let mut cache = RunnerClientCache::new(coordinator.clone());

        let client = cache.get_client(&scope).await.unwrap();
        let listing = cache.get_runner_listing(&client).await.unwrap();
        assert_eq!(listing.len(), 1);

        // A registration added mid-pass is not visible until reset.
        coordinator.register(&scope, registration(2, "i-2")).await;
        let listing = cache.get_runner_listing(&client).await.unwrap();
        assert_eq!(listing.len(), 1);

        cache.reset();
        assert!(cache.is_empty());
        let client = cache.get_client(&scope).await.unwrap();
        let listing = cache.get_runner_listing(&client).await.unwrap();
        assert_eq!(listing.len(), 2);

        let list_calls = coordinator
            .count(|c| matches!(c, CoordinatorCall::ListRunners { .. }))
            .await;
        assert_eq!(list_calls, 2);
        let app_tokens = coordinator
            .count(|c| matches!(c, CoordinatorCall::AppToken))
            .await;
        assert_eq!(app_tokens, 2);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_cached() {
        let coordinator = Arc::new(MockCoordinator::new());
        let mut cache = RunnerClientCache::new(coordinator.clone());
        let scope = OwnerScope::organization("acme").unwrap();

        coordinator.fail_auth(true);
        assert!(matches!(
            cache.get_client(&scope).await,
            Err(CoordinatorError::Auth { .. })
        ));

        coordinator.fail_auth(false);
        assert!(cache.get_client(&scope).await.is_ok());
    }
}
