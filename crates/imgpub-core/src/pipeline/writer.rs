//! Rendering of the aggregate pipeline document.
//!
//! Output is a GitLab-CI style child pipeline: a shared `.basic` template,
//! three ordered stages and per-image jobs chained through `needs`.

use serde_yaml::{Mapping, Value};

use crate::commands::{CommandList, EnvironmentBindings};
use crate::pipeline::config::PipelineConfig;

pub const STAGE_BUILD: &str = "build-image";
pub const STAGE_TEST: &str = "test-image";
pub const STAGE_DEPLOY: &str = "deploy-image";
pub const STAGE_INFO: &str = "info";

pub const TEMPLATE_JOB: &str = ".basic";
pub const NOTHING_TO_DO_JOB: &str = "no-further-action-required";

/// Job image and runner tags shared by every generated job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTemplate {
    pub image: String,
    pub tags: Vec<String>,
}

impl Default for StageTemplate {
    fn default() -> Self {
        Self {
            image: "docker:latest".to_string(),
            tags: Vec::new(),
        }
    }
}

/// How the document is rendered.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub template: StageTemplate,
    /// Write secret bindings into `variables`. Off by default: the runner
    /// is then expected to provide them as masked variables.
    pub embed_secrets: bool,
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn string_list<'a>(items: impl IntoIterator<Item = &'a String>) -> Value {
    Value::Sequence(items.into_iter().map(|s| Value::String(s.clone())).collect())
}

fn template_fields(job: &mut Mapping, template: &StageTemplate) {
    job.insert(key("image"), key(&template.image));
    if !template.tags.is_empty() {
        job.insert(key("tags"), string_list(&template.tags));
    }
}

/// Single informational job used when nothing needs rebuilding.
pub fn nothing_to_do(options: &RenderOptions) -> Mapping {
    let mut job = Mapping::new();
    template_fields(&mut job, &options.template);
    job.insert(key("stage"), key(STAGE_INFO));
    job.insert(
        key("script"),
        Value::Sequence(vec![key(
            "echo \"Nothing required updates. No builds scheduled.\"",
        )]),
    );

    let mut document = Mapping::new();
    document.insert(key("stages"), Value::Sequence(vec![key(STAGE_INFO)]));
    document.insert(key(NOTHING_TO_DO_JOB), Value::Mapping(job));
    document
}

/// Stage declarations and the shared job template.
pub fn preamble(options: &RenderOptions) -> Mapping {
    let mut template = Mapping::new();
    template_fields(&mut template, &options.template);

    let mut document = Mapping::new();
    document.insert(
        key("stages"),
        Value::Sequence(vec![key(STAGE_BUILD), key(STAGE_TEST), key(STAGE_DEPLOY)]),
    );
    document.insert(key(TEMPLATE_JOB), Value::Mapping(template));
    document
}

fn variables(bindings: &EnvironmentBindings, embed_secrets: bool) -> Value {
    let mut variables = Mapping::new();
    for (name, binding) in bindings.iter() {
        if binding.is_secret() && !embed_secrets {
            continue;
        }
        variables.insert(key(name), key(binding.value()));
    }
    Value::Mapping(variables)
}

fn job(stage: &str, needs: Option<String>, variables: &Value, script: &CommandList) -> Value {
    let mut job = Mapping::new();
    job.insert(key("extends"), key(TEMPLATE_JOB));
    job.insert(key("stage"), key(stage));
    if let Some(needs) = needs {
        job.insert(key("needs"), Value::Sequence(vec![Value::String(needs)]));
    }
    job.insert(key("variables"), variables.clone());
    job.insert(key("script"), string_list(script));
    Value::Mapping(job)
}

/// Append the build, optional test and push jobs of one image.
pub fn append_jobs(
    document: &mut Mapping,
    config: &PipelineConfig,
    bindings: &EnvironmentBindings,
    options: &RenderOptions,
) {
    let variables = variables(bindings, options.embed_secrets);

    document.insert(
        key(&config.build_name()),
        job(STAGE_BUILD, None, &variables, &config.build),
    );
    if let Some(test) = &config.test {
        document.insert(
            key(&config.test_name()),
            job(STAGE_TEST, Some(config.build_name()), &variables, test),
        );
    }
    document.insert(
        key(&config.push_name()),
        job(STAGE_DEPLOY, Some(config.push_needs()), &variables, &config.push),
    );
}
