//! Commit resolution and cloning through the `git` binary.

use tracing::info;

use crate::domain::error::Result;
use crate::domain::{ClonedWorkspace, CommitRef, HostCredentials, RepositorySpec};
use crate::process::command_output;

fn sensitive(repository: &RepositorySpec) -> Vec<String> {
    match &repository.credentials {
        HostCredentials::Gitlab(gitlab) => {
            let password = gitlab.deploy_token_password.expose();
            vec![password.to_string(), password.replace('@', "%40")]
        }
        HostCredentials::Github(_) => Vec::new(),
    }
}

/// Hash listed for `refs/heads/<branch>` in `git ls-remote` output.
///
/// Lines for other refs are ignored; if the ref is listed twice the last
/// entry wins.
pub fn parse_ls_remote<'a>(output: &'a str, branch: &str) -> Option<&'a str> {
    let reference = format!("refs/heads/{branch}");
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let hash = fields.next()?;
            (fields.next()? == reference && fields.next().is_none()).then_some(hash)
        })
        .last()
}

/// Resolve the head commit of the repository's configured branch.
pub async fn branch_head(repository: &RepositorySpec) -> Result<CommitRef> {
    let address = repository.repo();
    let secrets = sensitive(repository);
    let masked: Vec<&str> = secrets.iter().map(String::as_str).collect();
    let reference = format!("refs/heads/{}", repository.branch);
    let output = command_output(
        "git",
        &["ls-remote", &address, &reference, "-q"],
        None,
        &masked,
    )
    .await?;

    let hash = parse_ls_remote(&output, &repository.branch).unwrap_or_default();
    CommitRef::new(repository.http_url_to_repo(), &repository.branch, hash)
}

/// Clone the configured branch into a fresh temporary directory.
pub async fn clone(repository: &RepositorySpec) -> Result<ClonedWorkspace<'_>> {
    let dir = tempfile::Builder::new().prefix("imgpub-clone-").tempdir()?;
    let address = repository.repo();
    let secrets = sensitive(repository);
    let masked: Vec<&str> = secrets.iter().map(String::as_str).collect();
    let target = dir.path().to_string_lossy().to_string();
    command_output(
        "git",
        &[
            "clone",
            "--single-branch",
            "--branch",
            &repository.branch,
            &address,
            &target,
        ],
        None,
        &masked,
    )
    .await?;

    info!(repository = %repository.http_url_to_repo(), path = %target, "Cloned repository");
    Ok(ClonedWorkspace::owned(repository, dir))
}
