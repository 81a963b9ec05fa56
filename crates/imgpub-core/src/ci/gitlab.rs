//! GitLab v4 pipeline lookup.

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::domain::error::{PublishError, Result};
use crate::domain::{CommitRef, GitLabCredentials, RepositorySpec};

const PRIVATE_TOKEN: &str = "PRIVATE-TOKEN";

#[derive(Debug, Deserialize)]
struct Project {
    id: u64,
    http_url_to_repo: String,
}

#[derive(Debug, Deserialize)]
struct Pipeline {
    id: u64,
    status: String,
}

/// Resolves the project behind a clone address and reads the status of the
/// most recent pipeline for a commit.
#[derive(Debug, Clone)]
pub struct GitLabOracle {
    client: Client,
    /// Overrides the `https://<host>/api/v4` base derived from the address.
    api_base: Option<String>,
}

impl GitLabOracle {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            api_base: None,
        }
    }

    pub fn with_api_base(client: Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: Some(api_base.into().trim_end_matches('/').to_string()),
        }
    }

    /// Whether the newest pipeline for `commit` succeeded.
    ///
    /// Pipeline ids grow with creation time, so the largest id is the most
    /// recent run.
    pub async fn passed(
        &self,
        repository: &RepositorySpec,
        credentials: &GitLabCredentials,
        commit: &CommitRef,
    ) -> Result<bool> {
        let api = self.api_base_for(&repository.address)?;
        let project_id = self.project_id(&api, repository, credentials).await?;

        let url = format!("{api}/projects/{project_id}/pipelines");
        let request = self.client.get(&url).query(&[("sha", commit.hash())]);
        let pipelines: Vec<Pipeline> = self.fetch(request, &url, credentials).await?;
        debug!(project_id, pipelines = pipelines.len(), "Fetched gitlab pipelines");

        let latest = pipelines.into_iter().max_by_key(|p| p.id).ok_or_else(|| {
            PublishError::PipelineNotFound {
                repository: repository.http_url_to_repo(),
                commit: commit.hash().to_string(),
            }
        })?;

        debug!(pipeline_id = latest.id, status = %latest.status, "Selected most recent pipeline");
        Ok(latest.status == "success")
    }

    async fn project_id(
        &self,
        api: &str,
        repository: &RepositorySpec,
        credentials: &GitLabCredentials,
    ) -> Result<u64> {
        let name = project_name(&repository.address)?;
        let url = format!("{api}/projects");
        let request = self.client.get(&url).query(&[("search", name.as_str())]);
        let candidates: Vec<Project> = self.fetch(request, &url, credentials).await?;

        let wanted = repository.http_url_to_repo();
        candidates
            .iter()
            .find(|project| project.http_url_to_repo == wanted)
            .map(|project| project.id)
            .ok_or_else(|| {
                let found: Vec<&str> = candidates
                    .iter()
                    .map(|p| p.http_url_to_repo.as_str())
                    .collect();
                PublishError::ProjectNotFound(format!(
                    "searching for '{name}' found no project cloned from {wanted} (candidates: [{}])",
                    found.join(", ")
                ))
            })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
        credentials: &GitLabCredentials,
    ) -> Result<T> {
        let response = request
            .header(PRIVATE_TOKEN, credentials.personal_access_token.expose())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    fn api_base_for(&self, address: &str) -> Result<String> {
        if let Some(base) = &self.api_base {
            return Ok(base.clone());
        }
        let url = parse_address(address)?;
        let host = url.host_str().ok_or_else(|| {
            PublishError::Config(format!("repository address '{address}' has no host"))
        })?;
        Ok(match url.port() {
            Some(port) => format!("https://{host}:{port}/api/v4"),
            None => format!("https://{host}/api/v4"),
        })
    }
}

fn parse_address(address: &str) -> Result<url::Url> {
    url::Url::parse(address)
        .map_err(|e| PublishError::Config(format!("invalid repository address '{address}': {e}")))
}

/// Last path segment of the address without the `.git` suffix.
fn project_name(address: &str) -> Result<String> {
    let url = parse_address(address)?;
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|last| last.trim_end_matches(".git").to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| PublishError::Config(format!("repository address '{address}' has no path")))
}
