//! Configured source repositories and their host credentials.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::domain::error::{PublishError, Result};
use crate::domain::mapping::RegistryTarget;
use crate::domain::secret::Secret;

/// Source-control host flavour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    Github,
    Gitlab,
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Github => f.write_str("github"),
            HostType::Gitlab => f.write_str("gitlab"),
        }
    }
}

/// GitLab access: a personal token for the v4 API and a deploy token pair
/// for cloning.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabCredentials {
    pub personal_access_token: Secret,
    pub deploy_token_username: String,
    pub deploy_token_password: Secret,
}

/// GitHub access token for the actions API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubCredentials {
    pub github_token: Secret,
}

/// Credentials matching the repository's host type.
#[derive(Debug, Clone)]
pub enum HostCredentials {
    Github(GitHubCredentials),
    Gitlab(GitLabCredentials),
}

impl HostCredentials {
    pub fn host_type(&self) -> HostType {
        match self {
            HostCredentials::Github(_) => HostType::Github,
            HostCredentials::Gitlab(_) => HostType::Gitlab,
        }
    }
}

/// A source repository to reconcile.
///
/// Immutable once constructed; the clone location lives in
/// [`ClonedWorkspace`] instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawRepositorySpec")]
pub struct RepositorySpec {
    /// https clone address without credentials.
    pub address: String,
    pub branch: String,
    pub credentials: HostCredentials,
    pub registry: RegistryTarget,
    /// Enables the test stage; run in order inside the clone.
    pub ci_stage_test_script: Option<Vec<String>>,
    /// Run before `docker compose build`.
    pub pre_docker_build_hooks: Vec<String>,
    /// Run `ooil legacy-escape` before generating the compose spec.
    pub legacy_escape: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRepositorySpec {
    address: String,
    branch: String,
    host_type: HostType,
    registry: RegistryTarget,
    #[serde(default)]
    gitlab: Option<GitLabCredentials>,
    #[serde(default)]
    github: Option<GitHubCredentials>,
    #[serde(default)]
    ci_stage_test_script: Option<Vec<String>>,
    #[serde(default)]
    pre_docker_build_hooks: Vec<String>,
    #[serde(default)]
    legacy_escape: bool,
}

impl TryFrom<RawRepositorySpec> for RepositorySpec {
    type Error = PublishError;

    fn try_from(raw: RawRepositorySpec) -> Result<Self> {
        let credentials = match (raw.host_type, raw.github, raw.gitlab) {
            (HostType::Github, Some(github), _) => HostCredentials::Github(github),
            (HostType::Gitlab, _, Some(gitlab)) => HostCredentials::Gitlab(gitlab),
            (host_type, _, _) => {
                return Err(PublishError::MissingCredentials {
                    address: raw.address,
                    host_type: host_type.to_string(),
                    field: host_type.to_string(),
                })
            }
        };

        Ok(RepositorySpec {
            address: raw.address,
            branch: raw.branch,
            credentials,
            registry: raw.registry,
            ci_stage_test_script: raw.ci_stage_test_script,
            pre_docker_build_hooks: raw.pre_docker_build_hooks,
            legacy_escape: raw.legacy_escape,
        })
    }
}

impl RepositorySpec {
    pub fn host_type(&self) -> HostType {
        self.credentials.host_type()
    }

    /// Clone address carrying the deploy token, if any.
    pub fn repo(&self) -> String {
        self.format_address(false)
    }

    /// Like [`RepositorySpec::repo`] with `@` in the credentials percent-escaped.
    pub fn escaped_repo(&self) -> String {
        self.format_address(true)
    }

    /// Clone address with every credential stripped.
    pub fn http_url_to_repo(&self) -> String {
        self.address.clone()
    }

    fn format_address(&self, escape: bool) -> String {
        let HostCredentials::Gitlab(gitlab) = &self.credentials else {
            return self.address.clone();
        };
        let Some((scheme, rest)) = self.address.split_once("://") else {
            return self.address.clone();
        };

        let mut user = gitlab.deploy_token_username.clone();
        let mut password = gitlab.deploy_token_password.expose().to_string();
        if escape {
            user = user.replace('@', "%40");
            password = password.replace('@', "%40");
        }
        format!("{scheme}://{user}:{password}@{rest}")
    }
}

/// A repository together with the working tree it was cloned into.
///
/// The temporary directory is removed when the workspace is dropped.
#[derive(Debug)]
pub struct ClonedWorkspace<'a> {
    pub spec: &'a RepositorySpec,
    path: PathBuf,
    _guard: Option<TempDir>,
}

impl<'a> ClonedWorkspace<'a> {
    /// Wrap a clone that owns its temporary directory.
    pub fn owned(spec: &'a RepositorySpec, dir: TempDir) -> Self {
        Self {
            spec,
            path: dir.path().to_path_buf(),
            _guard: Some(dir),
        }
    }

    /// Wrap a clone living at a path managed by the caller.
    pub fn at(spec: &'a RepositorySpec, path: impl Into<PathBuf>) -> Self {
        Self {
            spec,
            path: path.into(),
            _guard: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
