//! GitHub Actions workflow-run lookup.

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::domain::error::{PublishError, Result};
use crate::domain::{CommitRef, GitHubCredentials, RepositorySpec};

pub const GITHUB_API: &str = "https://api.github.com";

const PER_PAGE: &str = "100";

#[derive(Debug, Deserialize)]
struct WorkflowRunsPage {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    #[serde(default)]
    head_commit: Option<HeadCommit>,
    #[serde(default)]
    head_sha: Option<String>,
    #[serde(default)]
    head_branch: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HeadCommit {
    id: String,
}

impl WorkflowRun {
    fn commit_id(&self) -> Option<&str> {
        self.head_commit
            .as_ref()
            .map(|c| c.id.as_str())
            .or(self.head_sha.as_deref())
    }

    fn is_for(&self, commit: &CommitRef) -> bool {
        self.commit_id() == Some(commit.hash())
            && self.head_branch.as_deref() == Some(commit.branch())
    }

    fn is_green(&self) -> bool {
        self.status.as_deref() == Some("completed") && self.conclusion.as_deref() == Some("success")
    }
}

/// Queries the workflow-runs listing of a GitHub repository.
#[derive(Debug, Clone)]
pub struct GitHubOracle {
    client: Client,
    api_base: String,
}

impl GitHubOracle {
    pub fn new(client: Client) -> Self {
        Self::with_api_base(client, GITHUB_API)
    }

    pub fn with_api_base(client: Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Scan the runs listed for the branch, page by page.
    ///
    /// The first run for the commit that completed successfully ends the scan
    /// with `true`. If the listing is exhausted, the answer is `false` when
    /// some run for the commit was seen, and `CiResultMissing` otherwise.
    pub async fn passed(
        &self,
        repository: &RepositorySpec,
        credentials: &GitHubCredentials,
        commit: &CommitRef,
    ) -> Result<bool> {
        let slug = repository_slug(&repository.address)?;
        let mut url = format!("{}/repos/{slug}/actions/runs", self.api_base);
        let mut first_page = true;
        let mut seen_for_commit = false;

        loop {
            let mut request = self
                .client
                .get(&url)
                .header(AUTHORIZATION, format!("Bearer {}", credentials.github_token.expose()))
                .header(ACCEPT, "application/vnd.github+json");
            if first_page {
                request = request.query(&[("branch", commit.branch()), ("per_page", PER_PAGE)]);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(PublishError::UnexpectedStatus {
                    url,
                    status: status.as_u16(),
                });
            }
            let next = next_link(response.headers());
            let page: WorkflowRunsPage = response.json().await?;
            debug!(url = %url, runs = page.workflow_runs.len(), "Scanned workflow runs page");

            for run in page.workflow_runs.iter().filter(|run| run.is_for(commit)) {
                if run.is_green() {
                    return Ok(true);
                }
                seen_for_commit = true;
            }

            match next {
                Some(next) => {
                    url = next;
                    first_page = false;
                }
                None => break,
            }
        }

        if seen_for_commit {
            return Ok(false);
        }

        Err(PublishError::CiResultMissing {
            repository: repository.http_url_to_repo(),
            branch: commit.branch().to_string(),
            commit: commit.hash().to_string(),
        })
    }
}

/// `owner/name` from a github clone address.
fn repository_slug(address: &str) -> Result<String> {
    let url = url::Url::parse(address)
        .map_err(|e| PublishError::Config(format!("invalid repository address '{address}': {e}")))?;
    let slug = url
        .path()
        .trim_matches('/')
        .trim_end_matches(".git")
        .to_string();
    if slug.split('/').count() != 2 {
        return Err(PublishError::Config(format!(
            "repository address '{address}' does not name an owner/repository pair"
        )));
    }
    Ok(slug)
}

/// Extract the `rel="next"` target of an RFC 8288 `Link` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut segments = part.split(';');
        let target = segments.next()?.trim();
        let is_next = segments.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_repository_slug() {
        assert_eq!(
            repository_slug("https://github.com/ITISFoundation/osparc-simcore.git").unwrap(),
            "ITISFoundation/osparc-simcore"
        );
        assert_eq!(
            repository_slug("https://github.com/org/repo").unwrap(),
            "org/repo"
        );
        assert!(repository_slug("https://github.com/just-owner").is_err());
        assert!(repository_slug("not a url").is_err());
    }

    #[test]
    fn test_next_link_found_among_relations() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                "<https://api.github.com/x?page=1>; rel=\"prev\", \
                 <https://api.github.com/x?page=3>; rel=\"next\", \
                 <https://api.github.com/x?page=9>; rel=\"last\"",
            ),
        );
        assert_eq!(
            next_link(&headers).as_deref(),
            Some("https://api.github.com/x?page=3")
        );
    }

    #[test]
    fn test_next_link_absent_on_last_page() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static("<https://api.github.com/x?page=1>; rel=\"first\""),
        );
        assert_eq!(next_link(&headers), None);
        assert_eq!(next_link(&HeaderMap::new()), None);
    }

    #[test]
    fn test_workflow_run_predicates() {
        let commit = CommitRef::new("repo", "main", "a".repeat(40)).unwrap();
        let run: WorkflowRun = serde_json::from_value(serde_json::json!({
            "head_commit": {"id": "a".repeat(40)},
            "head_branch": "main",
            "status": "completed",
            "conclusion": "failure",
        }))
        .unwrap();
        assert!(run.is_for(&commit));
        assert!(!run.is_green());

        let by_sha: WorkflowRun = serde_json::from_value(serde_json::json!({
            "head_sha": "a".repeat(40),
            "head_branch": "main",
            "status": "completed",
            "conclusion": "success",
        }))
        .unwrap();
        assert!(by_sha.is_for(&commit));
        assert!(by_sha.is_green());
    }
}
