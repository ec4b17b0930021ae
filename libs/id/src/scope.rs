//! Owner scope resolution.
//!
//! Runners are registered either organization-wide or against a single
//! repository. Every coordinator call (installation lookup, runner listing,
//! de-registration) is addressed by that scope, and per-pass caches are keyed
//! by its canonical [`ScopeKey`].

use serde::{Deserialize, Serialize};

use crate::IdError;

/// Whether runners are registered at organization or repository level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Organization,
    Repository,
}

/// The (owner, repository?) pair runners are registered under.
///
/// `repository_name` is empty exactly when the scope is organization-wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerScope {
    owner_login: String,
    repository_name: String,
}

impl OwnerScope {
    /// Organization-wide scope.
    pub fn organization(owner: &str) -> Result<Self, IdError> {
        let owner = non_empty(owner, "organization")?;
        Ok(Self {
            owner_login: owner.to_string(),
            repository_name: String::new(),
        })
    }

    /// Repository scope.
    pub fn repository(owner: &str, repo: &str) -> Result<Self, IdError> {
        let owner = non_empty(owner, "repository owner")?;
        let repo = non_empty(repo, "repository name")?;
        Ok(Self {
            owner_login: owner.to_string(),
            repository_name: repo.to_string(),
        })
    }

    /// Derive the scope from an instance's `Org`/`Repo` tags.
    ///
    /// With `org_level` set the organization alone is used and any repository
    /// is ignored. Otherwise the repository tag is used; it may carry the full
    /// `owner/name`, in which case the owner comes from it, else the owner is
    /// taken from `org`.
    pub fn resolve(org: Option<&str>, repo: Option<&str>, org_level: bool) -> Result<Self, IdError> {
        if org_level {
            let org = org.ok_or_else(|| unresolvable("organization tag is missing"))?;
            return Self::organization(org);
        }

        let repo = repo.ok_or_else(|| unresolvable("repository tag is missing"))?;
        match repo.split_once('/') {
            Some((owner, name)) => Self::repository(owner, name),
            None => {
                let owner = org.ok_or_else(|| {
                    unresolvable(format!("repository '{repo}' has no owner"))
                })?;
                Self::repository(owner, repo)
            }
        }
    }

    /// Returns the owner login (organization or repository owner).
    pub fn owner_login(&self) -> &str {
        &self.owner_login
    }

    /// Returns the repository name, empty for organization scopes.
    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    /// Returns the scope kind.
    pub fn kind(&self) -> ScopeKind {
        if self.repository_name.is_empty() {
            ScopeKind::Organization
        } else {
            ScopeKind::Repository
        }
    }

    /// Returns the canonical cache key for this scope.
    pub fn key(&self) -> ScopeKey {
        match self.kind() {
            ScopeKind::Organization => ScopeKey(self.owner_login.clone()),
            ScopeKind::Repository => {
                ScopeKey(format!("{}/{}", self.owner_login, self.repository_name))
            }
        }
    }
}

impl std::fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            ScopeKind::Organization => write!(f, "org:{}", self.owner_login),
            ScopeKind::Repository => {
                write!(f, "repo:{}/{}", self.owner_login, self.repository_name)
            }
        }
    }
}

/// Canonical key of an [`OwnerScope`]: `owner` or `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn non_empty<'a>(value: &'a str, what: &str) -> Result<&'a str, IdError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(unresolvable(format!("{what} is empty")));
    }
    Ok(trimmed)
}

fn unresolvable(reason: impl Into<String>) -> IdError {
    IdError::UnresolvableScope {
        reason: reason.into(),
    }
}
