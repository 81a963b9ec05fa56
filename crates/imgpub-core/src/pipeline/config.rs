//! Per-image stage plan.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::commands::{CommandList, EnvironmentBindings, TemplateEngine};
use crate::domain::error::Result;

/// File extension of per-target descriptor files.
pub const DESCRIPTOR_EXTENSION: &str = "pipeline_config";

/// Build, optional test and push commands for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Image name with `/` replaced by `-`, usable as a job identifier.
    pub target: String,
    pub build: CommandList,
    pub test: Option<CommandList>,
    pub push: CommandList,
}

impl PipelineConfig {
    /// Validate every stage against `bindings` and assemble the plan.
    ///
    /// Each stage is checked on its own so the error names the offending
    /// command of the first stage that fails.
    pub fn validated(
        target: &str,
        build: CommandList,
        test: Option<CommandList>,
        push: CommandList,
        engine: &TemplateEngine,
        bindings: &EnvironmentBindings,
    ) -> Result<Self> {
        engine.validate(&build, bindings)?;
        if let Some(test) = &test {
            engine.validate(test, bindings)?;
        }
        engine.validate(&push, bindings)?;

        Ok(Self {
            target: escape_target(target),
            build,
            test,
            push,
        })
    }

    pub fn build_name(&self) -> String {
        format!("{}-build", self.target)
    }

    pub fn test_name(&self) -> String {
        format!("{}-test", self.target)
    }

    pub fn push_name(&self) -> String {
        format!("{}-push", self.target)
    }

    /// Job the push stage waits for.
    pub fn push_needs(&self) -> String {
        if self.test.is_some() {
            self.test_name()
        } else {
            self.build_name()
        }
    }

    /// Write `<dir>/<target>.pipeline_config` as JSON for inspection.
    pub fn write_descriptor(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.{DESCRIPTOR_EXTENSION}", self.target));
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        debug!(path = %path.display(), "Wrote pipeline descriptor");
        Ok(path)
    }
}

/// `/` is not valid in job names.
pub fn escape_target(name: &str) -> String {
    name.replace('/', "-")
}
