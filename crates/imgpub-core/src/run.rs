//! The reconciliation run: CI gate, image discovery, build-or-skip, assembly.
//!
//! Repositories are processed one after another. A failure aborts only the
//! repository it belongs to; the run continues with the next one and the
//! failure is recorded in the [`RunReport`].

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::ci::CiOracle;
use crate::commands::{
    build_commands, push_commands, test_commands, EnvironmentBindings, TemplateEngine,
};
use crate::compose;
use crate::config::{PublisherConfig, RunOptions};
use crate::domain::error::Result;
use crate::domain::{CommitRef, ImageRef, RepositorySpec};
use crate::git;
use crate::http::build_client;
use crate::pipeline::{escape_target, PipelineAssembler, PipelineConfig};
use crate::planner::{self, Action};
use crate::registry::RegistryClient;

/// Where commits and images of a repository come from.
#[async_trait]
pub trait SourceHost: Send + Sync {
    /// Head commit of the configured branch.
    async fn branch_head(&self, repository: &RepositorySpec) -> Result<CommitRef>;

    /// `image:tag` references the repository produces, in discovery order.
    async fn images(&self, repository: &RepositorySpec) -> Result<Vec<ImageRef>>;
}

/// `git` for commits, a fresh clone plus `ooil compose` for images.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitSource;

#[async_trait]
impl SourceHost for GitSource {
    async fn branch_head(&self, repository: &RepositorySpec) -> Result<CommitRef> {
        git::branch_head(repository).await
    }

    async fn images(&self, repository: &RepositorySpec) -> Result<Vec<ImageRef>> {
        let workspace = git::clone(repository).await?;
        compose::generate(&workspace).await?;
        compose::read_images(workspace.path())
    }
}

/// What happened to one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RepositoryOutcome {
    /// Pipelines were queued for these images.
    Queued { images: Vec<String> },
    /// Every image is already published.
    UpToDate,
    /// The head commit has no green CI run.
    CiNotPassed { commit: String },
    Failed { error: String, configuration: bool },
}

impl fmt::Display for RepositoryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOutcome::Queued { images } => write!(f, "queued {} image(s)", images.len()),
            RepositoryOutcome::UpToDate => write!(f, "up to date"),
            RepositoryOutcome::CiNotPassed { commit } => write!(f, "CI not passed at {commit}"),
            RepositoryOutcome::Failed { error, .. } => write!(f, "failed: {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryReport {
    pub repository: String,
    #[serde(flatten)]
    pub outcome: RepositoryOutcome,
}

/// Per-repository outcomes in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub repositories: Vec<RepositoryReport>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &RepositoryReport> {
        self.repositories
            .iter()
            .filter(|r| matches!(r.outcome, RepositoryOutcome::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Number of images queued across all repositories.
    pub fn queued_images(&self) -> usize {
        self.repositories
            .iter()
            .map(|r| match &r.outcome {
                RepositoryOutcome::Queued { images } => images.len(),
                _ => 0,
            })
            .sum()
    }
}

/// Result of a run: the rendered document and what led to it.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub document: String,
    pub configs: Vec<PipelineConfig>,
    pub report: RunReport,
}

impl RunOutcome {
    /// Write the document to `output` and, if requested, one descriptor per
    /// queued image into `descriptors`.
    pub fn write(&self, output: &Path, descriptors: Option<&Path>) -> Result<Vec<PathBuf>> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, &self.document)?;
        info!(path = %output.display(), "Wrote pipeline document");

        let mut written = vec![output.to_path_buf()];
        if let Some(dir) = descriptors {
            for config in &self.configs {
                written.push(config.write_descriptor(dir)?);
            }
        }
        Ok(written)
    }
}

/// Drives one reconciliation pass over every configured repository.
pub struct Reconciler<S = GitSource> {
    config: PublisherConfig,
    options: RunOptions,
    source: S,
    client: Client,
    registry: RegistryClient,
    engine: TemplateEngine,
}

impl Reconciler<GitSource> {
    pub fn new(config: PublisherConfig, options: RunOptions) -> Result<Self> {
        Self::with_source(config, options, GitSource)
    }
}

impl<S: SourceHost> Reconciler<S> {
    pub fn with_source(config: PublisherConfig, options: RunOptions, source: S) -> Result<Self> {
        let client = build_client(options.timeout)?;
        Ok(Self {
            config,
            options,
            source,
            registry: RegistryClient::new(client.clone()),
            client,
            engine: TemplateEngine::default(),
        })
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Reconcile every repository and render the pipeline document once.
    pub async fn run(&self) -> Result<RunOutcome> {
        let assembler = PipelineAssembler::new();
        let mut report = RunReport::default();

        for repository in &self.config.repositories {
            let name = repository.http_url_to_repo();
            info!(repository = %name, branch = %repository.branch, "Reconciling repository");

            let outcome = match self.reconcile(repository, &assembler).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(repository = %name, error = %e, "Repository failed");
                    RepositoryOutcome::Failed {
                        configuration: e.is_configuration(),
                        error: e.to_string(),
                    }
                }
            };
            info!(repository = %name, outcome = %outcome, "Repository done");
            report.repositories.push(RepositoryReport {
                repository: name,
                outcome,
            });
        }

        let configs = assembler.configs().await;
        let document = assembler.finalize(&self.options.render)?;
        Ok(RunOutcome {
            document,
            configs,
            report,
        })
    }

    async fn reconcile(
        &self,
        repository: &RepositorySpec,
        assembler: &PipelineAssembler,
    ) -> Result<RepositoryOutcome> {
        let endpoint = self.config.endpoint_for(repository)?;

        let commit = self.source.branch_head(repository).await?;
        let oracle =
            CiOracle::for_repository(repository, &self.options.ci_hosts, self.client.clone());
        if !oracle.passed(repository, &commit).await? {
            warn!(commit = %commit, "CI did not pass, nothing scheduled");
            return Ok(RepositoryOutcome::CiNotPassed {
                commit: commit.hash().to_string(),
            });
        }

        let images = self.source.images(repository).await?;
        let tags = self.registry.bind(endpoint);
        let mut plans = Vec::new();
        let mut queued = Vec::new();

        let mut seen = HashSet::new();
        for image in &images {
            if !seen.insert(image) {
                debug!(image = %image, "Image declared by several services, planned once");
                continue;
            }
            let paths = match planner::plan(&repository.registry.mapping, image, &tags).await? {
                Action::Skip(_) => continue,
                Action::Build(paths) => paths,
            };

            let target = escape_target(&image.name);
            let clone_dir = self.options.clone_dir(&target);
            let bindings =
                EnvironmentBindings::for_image(repository, endpoint, image, &paths, &clone_dir);
            let config = PipelineConfig::validated(
                &image.name,
                build_commands(repository),
                test_commands(repository),
                push_commands(),
                &self.engine,
                &bindings,
            )?;
            plans.push((config, bindings));
            queued.push(image.to_string());
        }

        if plans.is_empty() {
            return Ok(RepositoryOutcome::UpToDate);
        }
        assembler.add_all(plans).await?;
        Ok(RepositoryOutcome::Queued { images: queued })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let report = RunReport {
            repositories: vec![
                RepositoryReport {
                    repository: "a".to_string(),
                    outcome: RepositoryOutcome::Queued {
                        images: vec!["x:1".to_string(), "y:1".to_string()],
                    },
                },
                RepositoryReport {
                    repository: "b".to_string(),
                    outcome: RepositoryOutcome::UpToDate,
                },
                RepositoryReport {
                    repository: "c".to_string(),
                    outcome: RepositoryOutcome::Failed {
                        error: "boom".to_string(),
                        configuration: true,
                    },
                },
            ],
        };
        assert_eq!(report.queued_images(), 2);
        assert!(report.has_failures());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_report_serializes_flat() {
        let report = RepositoryReport {
            repository: "https://github.com/org/app.git".to_string(),
            outcome: RepositoryOutcome::CiNotPassed {
                commit: "a".repeat(40),
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "ci_not_passed");
        assert_eq!(json["repository"], "https://github.com/org/app.git");
    }

    #[test]
    fn test_write_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::validated(
            "org/app",
            vec!["echo build".to_string()],
            None,
            vec!["echo push".to_string()],
            &TemplateEngine::default(),
            &EnvironmentBindings::new(),
        )
        .unwrap();
        let outcome = RunOutcome {
            document: "stages: []\n".to_string(),
            configs: vec![config],
            report: RunReport::default(),
        };

        let output = dir.path().join("out/pipeline.yml");
        let descriptors = dir.path().join("configs");
        let written = outcome.write(&output, Some(&descriptors)).unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "stages: []\n");
        assert!(descriptors.join("org-app.pipeline_config").exists());
    }
}
