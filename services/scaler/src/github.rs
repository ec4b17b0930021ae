//! GitHub REST implementation of the coordinator interface.
//!
//! App credentials are short-lived RS256 JWTs signed with the app's private
//! key; installation tokens are minted from them per scope. Works against
//! github.com and GitHub Enterprise Server (`{GHES_URL}/api/v3`).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ghr_id::{InstallationId, OwnerScope, RunnerId, ScopeKind};
use ghr_reconcile::RemoteRegistration;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coordinator::{AccessToken, CoordinatorApi};
use crate::error::CoordinatorError;

const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// Maximum page size accepted by the runners endpoints.
pub const RUNNERS_PER_PAGE: usize = 100;

/// GitHub App identity used to mint app-level tokens.
#[derive(Clone)]
pub struct AppCredentials {
    pub app_id: String,
    pub private_key: SecretString,
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

/// GitHub API client.
pub struct GitHubApi {
    client: reqwest::Client,
    api_url: String,
    app: Option<AppCredentials>,
}

impl GitHubApi {
    /// Create a client for the given API base URL.
    pub fn new(api_url: impl Into<String>, app: Option<AppCredentials>) -> Result<Self, CoordinatorError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("ghr-scaler"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(GITHUB_API_VERSION),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoordinatorError::Http {
                status: None,
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            app,
        })
    }

    /// API base URL for github.com, or for a GitHub Enterprise Server host.
    pub fn api_url_for(ghes_url: Option<&str>) -> String {
        match ghes_url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(base) => format!("{}/api/v3", base.trim_end_matches('/')),
            None => DEFAULT_GITHUB_API_URL.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn runners_path(scope: &OwnerScope) -> String {
        match scope.kind() {
            ScopeKind::Organization => format!("/orgs/{}/actions/runners", scope.owner_login()),
            ScopeKind::Repository => format!(
                "/repos/{}/{}/actions/runners",
                scope.owner_login(),
                scope.repository_name()
            ),
        }
    }

    fn generate_jwt(app: &AppCredentials, now: u64) -> Result<String, CoordinatorError> {
        #[derive(Debug, Serialize)]
        struct Claims {
            iat: u64,
            exp: u64,
            iss: String,
        }

        // Backdated to tolerate clock drift; GitHub caps lifetime at 10 minutes.
        let claims = Claims {
            iat: now.saturating_sub(60),
            exp: now + 540,
            iss: app.app_id.clone(),
        };
        let key = EncodingKey::from_rsa_pem(app.private_key.expose_secret().as_bytes())
            .map_err(|e| jwt_error(e.to_string()))?;

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| jwt_error(e.to_string()))
    }

    async fn get_installation(
        &self,
        app_token: &AccessToken,
        path: &str,
    ) -> Result<InstallationId, CoordinatorError> {
        #[derive(Deserialize)]
        struct Installation {
            id: InstallationId,
        }

        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(app_token.expose())
            .send()
            .await
            .map_err(|e| auth_error("installation lookup", e.to_string()))?;

        let response = check(response)
            .await
            .map_err(|e| auth_error("installation lookup", e.to_string()))?;
        let installation: Installation = response
            .json()
            .await
            .map_err(|e| CoordinatorError::Decode(e.to_string()))?;
        Ok(installation.id)
    }
}

#[async_trait]
impl CoordinatorApi for GitHubApi {
    async fn app_token(&self) -> Result<AccessToken, CoordinatorError> {
        let app = self
            .app
            .as_ref()
            .ok_or_else(|| auth_error("app token", "app credentials are not configured"))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| auth_error("app token", e.to_string()))?
            .as_secs();
        Self::generate_jwt(app, now).map(AccessToken::new)
    }

    async fn org_installation(
        &self,
        app_token: &AccessToken,
        org: &str,
    ) -> Result<InstallationId, CoordinatorError> {
        self.get_installation(app_token, &format!("/orgs/{org}/installation"))
            .await
    }

    async fn repo_installation(
        &self,
        app_token: &AccessToken,
        owner: &str,
        repo: &str,
    ) -> Result<InstallationId, CoordinatorError> {
        self.get_installation(app_token, &format!("/repos/{owner}/{repo}/installation"))
            .await
    }

    async fn installation_token(
        &self,
        app_token: &AccessToken,
        installation_id: InstallationId,
    ) -> Result<AccessToken, CoordinatorError> {
        #[derive(Deserialize)]
        struct InstallationToken {
            token: String,
        }

        let url = self.url(&format!("/app/installations/{installation_id}/access_tokens"));
        let response = self
            .client
            .post(url)
            .bearer_auth(app_token.expose())
            .send()
            .await
            .map_err(|e| auth_error("installation token", e.to_string()))?;

        let response = check(response)
            .await
            .map_err(|e| auth_error("installation token", e.to_string()))?;
        let body: InstallationToken = response
            .json()
            .await
            .map_err(|e| CoordinatorError::Decode(e.to_string()))?;
        Ok(AccessToken::new(body.token))
    }

    async fn list_runners(
        &self,
        token: &AccessToken,
        scope: &OwnerScope,
    ) -> Result<Vec<RemoteRegistration>, CoordinatorError> {
        #[derive(Deserialize)]
        struct RunnerPage {
            total_count: usize,
            runners: Vec<RemoteRegistration>,
        }

        let url = self.url(&Self::runners_path(scope));
        let mut runners = Vec::new();
        let mut page = 1usize;

        loop {
            let response = self
                .client
                .get(&url)
                .bearer_auth(token.expose())
                .query(&[("per_page", RUNNERS_PER_PAGE), ("page", page)])
                .send()
                .await
                .map_err(transport_error)?;
            let body: RunnerPage = check(response)
                .await?
                .json()
                .await
                .map_err(|e| CoordinatorError::Decode(e.to_string()))?;

            let fetched = body.runners.len();
            runners.extend(body.runners);
            debug!(scope = %scope, page, fetched, total = body.total_count, "Fetched runner page");

            if fetched == 0 || runners.len() >= body.total_count {
                break;
            }
            page += 1;
        }

        Ok(runners)
    }

    async fn delete_runner(
        &self,
        token: &AccessToken,
        scope: &OwnerScope,
        runner_id: RunnerId,
    ) -> Result<(), CoordinatorError> {
        let url = self.url(&format!("{}/{}", Self::runners_path(scope), runner_id));
        let response = self
            .client
            .delete(url)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(transport_error)?;

        match check(response).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(scope = %scope, runner_id = %runner_id, "Runner already removed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Pass through successful responses; turn anything else into an error.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, CoordinatorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!(status = %status, body = %body, "GitHub API request failed");
    Err(CoordinatorError::Http {
        status: Some(status.as_u16()),
        message: body,
    })
}

fn transport_error(e: reqwest::Error) -> CoordinatorError {
    CoordinatorError::Http {
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}

fn auth_error(stage: &'static str, message: impl Into<String>) -> CoordinatorError {
    CoordinatorError::Auth {
        stage,
        message: message.into(),
    }
}

fn jwt_error(message: String) -> CoordinatorError {
    auth_error("app token", message)
}
