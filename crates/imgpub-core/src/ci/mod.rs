//! CI gate: did the upstream CI pass for a commit?
//!
//! One oracle per host type, dispatched over a closed enum selected by the
//! repository's credentials.

pub mod github;
pub mod gitlab;

pub use github::{GitHubOracle, GITHUB_API};
pub use gitlab::GitLabOracle;

use reqwest::Client;
use tracing::info;

use crate::domain::error::{PublishError, Result};
use crate::domain::{CommitRef, HostCredentials, HostType, RepositorySpec};

/// API endpoints of the CI hosts.
#[derive(Debug, Clone)]
pub struct CiHosts {
    pub github_api: String,
    /// `None` derives `https://<host>/api/v4` from each repository address.
    pub gitlab_api: Option<String>,
}

impl Default for CiHosts {
    fn default() -> Self {
        Self {
            github_api: GITHUB_API.to_string(),
            gitlab_api: None,
        }
    }
}

/// CI status lookup for one host type.
#[derive(Debug, Clone)]
pub enum CiOracle {
    Github(GitHubOracle),
    Gitlab(GitLabOracle),
}

impl CiOracle {
    /// Pick the oracle matching the repository's host type.
    pub fn for_repository(repository: &RepositorySpec, hosts: &CiHosts, client: Client) -> Self {
        match repository.host_type() {
            HostType::Github => {
                CiOracle::Github(GitHubOracle::with_api_base(client, hosts.github_api.clone()))
            }
            HostType::Gitlab => CiOracle::Gitlab(match &hosts.gitlab_api {
                Some(api) => GitLabOracle::with_api_base(client, api.clone()),
                None => GitLabOracle::new(client),
            }),
        }
    }

    pub fn host_type(&self) -> HostType {
        match self {
            CiOracle::Github(_) => HostType::Github,
            CiOracle::Gitlab(_) => HostType::Gitlab,
        }
    }

    /// Whether CI passed for `commit`.
    ///
    /// Transport errors propagate untouched; no retries happen here.
    pub async fn passed(&self, repository: &RepositorySpec, commit: &CommitRef) -> Result<bool> {
        let passed = match (self, &repository.credentials) {
            (CiOracle::Github(oracle), HostCredentials::Github(credentials)) => {
                oracle.passed(repository, credentials, commit).await?
            }
            (CiOracle::Gitlab(oracle), HostCredentials::Gitlab(credentials)) => {
                oracle.passed(repository, credentials, commit).await?
            }
            (oracle, _) => {
                return Err(PublishError::MissingCredentials {
                    address: repository.http_url_to_repo(),
                    host_type: oracle.host_type().to_string(),
                    field: oracle.host_type().to_string(),
                })
            }
        };

        info!(commit = %commit, host = %self.host_type(), passed, "CI gate evaluated");
        Ok(passed)
    }
}
