//! Publisher configuration and run options.

use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use crate::ci::CiHosts;
use crate::commands::VARIABLE_PREFIX;
use crate::domain::error::{PublishError, Result};
use crate::domain::{RegistryEndpoint, RepositorySpec};
use crate::http::DEFAULT_TIMEOUT;
use crate::pipeline::RenderOptions;

/// Registries and repositories to reconcile.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherConfig {
    pub registries: BTreeMap<String, RegistryEndpoint>,
    pub repositories: Vec<RepositorySpec>,
}

impl PublisherConfig {
    /// Load `path`, expanding `${VAR}` in string values from the process
    /// environment.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PublishError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_yaml_str(&text, |name| std::env::var(name).ok())?;
        debug!(
            path = %path.display(),
            registries = config.registries.len(),
            repositories = config.repositories.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate a configuration document.
    pub fn from_yaml_str<F>(text: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut document: Value = serde_yaml::from_str(text)?;
        expand_scalars(&mut document, &lookup)?;
        let config: Self = serde_yaml::from_value(document)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for repository in &self.repositories {
            self.endpoint_for(repository)?;
        }
        Ok(())
    }

    /// Registry the repository publishes to.
    pub fn endpoint_for(&self, repository: &RepositorySpec) -> Result<&RegistryEndpoint> {
        self.registries
            .get(&repository.registry.target)
            .ok_or_else(|| PublishError::UnknownRegistry {
                repository: repository.http_url_to_repo(),
                target: repository.registry.target.clone(),
            })
    }
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(\$)?\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env pattern is valid")
    })
}

/// Expand every string scalar of an already parsed document, so values are
/// never re-read as YAML.
fn expand_scalars<F>(value: &mut Value, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(text) => *text = expand_env(text, lookup)?,
        Value::Sequence(items) => {
            for item in items {
                expand_scalars(item, lookup)?;
            }
        }
        Value::Mapping(mapping) => {
            for item in mapping.values_mut() {
                expand_scalars(item, lookup)?;
            }
        }
        Value::Tagged(tagged) => expand_scalars(&mut tagged.value, lookup)?,
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

/// Expand `${VAR}` references.
///
/// `$${VAR}` is kept as a literal `${VAR}`; `${SCCI*}` is never expanded.
pub fn expand_env<F>(text: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut expanded = String::with_capacity(text.len());
    let mut last = 0;

    for capture in env_pattern().captures_iter(text) {
        let Some(whole) = capture.get(0) else {
            continue;
        };
        let name = &capture[2];
        expanded.push_str(&text[last..whole.start()]);
        last = whole.end();

        if capture.get(1).is_some() || name.starts_with(VARIABLE_PREFIX) {
            expanded.push_str(&format!("${{{name}}}"));
            continue;
        }
        match lookup(name) {
            Some(value) => expanded.push_str(&value),
            None => {
                return Err(PublishError::Config(format!(
                    "environment variable '{name}' is not set"
                )))
            }
        }
    }
    expanded.push_str(&text[last..]);
    Ok(expanded)
}

/// Knobs of one run that do not belong in the configuration file.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Bound on every HTTP request.
    pub timeout: Duration,
    /// Where the pipeline document is written.
    pub output: PathBuf,
    /// Directory for `<target>.pipeline_config` files; `None` skips them.
    pub descriptors: Option<PathBuf>,
    /// Base of the clone directory used inside generated jobs.
    pub clone_base: PathBuf,
    pub render: RenderOptions,
    pub ci_hosts: CiHosts,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            output: PathBuf::from("generated-pipeline.yml"),
            descriptors: Some(PathBuf::from("pipeline_configs")),
            clone_base: PathBuf::from("/tmp/imgpub"),
            render: RenderOptions::default(),
            ci_hosts: CiHosts::default(),
        }
    }
}

impl RunOptions {
    /// Clone directory of a generated job, stable across runs.
    pub fn clone_dir(&self, target: &str) -> PathBuf {
        self.clone_base.join(target)
    }
}
