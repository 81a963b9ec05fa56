//! Accumulates per-image plans and renders them once at the end of a run.

use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::commands::EnvironmentBindings;
use crate::domain::error::{PublishError, Result};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::writer::{self, RenderOptions};

#[derive(Debug, Default)]
struct Entries {
    plans: Vec<(PipelineConfig, EnvironmentBindings)>,
    targets: HashSet<String>,
}

/// Append-only collection of image plans.
///
/// `add` is serialised through a mutex so several repositories may be
/// reconciled concurrently against one assembler.
#[derive(Debug, Default)]
pub struct PipelineAssembler {
    entries: Mutex<Entries>,
}

impl PipelineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a validated plan. Plans keep their insertion order.
    pub async fn add(&self, config: PipelineConfig, bindings: EnvironmentBindings) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if !entries.targets.insert(config.target.clone()) {
            return Err(PublishError::DuplicateTarget(config.target));
        }
        debug!(target = %config.target, position = entries.plans.len(), "Queued pipeline");
        entries.plans.push((config, bindings));
        Ok(())
    }

    /// Queue every plan of one repository, or none of them.
    pub async fn add_all(
        &self,
        plans: Vec<(PipelineConfig, EnvironmentBindings)>,
    ) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let mut incoming = HashSet::new();
        for (config, _) in &plans {
            let target = config.target.as_str();
            if entries.targets.contains(target) || !incoming.insert(target) {
                return Err(PublishError::DuplicateTarget(config.target.clone()));
            }
        }

        let added = plans.len();
        for (config, bindings) in plans {
            entries.targets.insert(config.target.clone());
            entries.plans.push((config, bindings));
        }
        debug!(added, total = entries.plans.len(), "Queued repository pipelines");
        Ok(added)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.plans.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of the queued plans.
    pub async fn configs(&self) -> Vec<PipelineConfig> {
        self.entries
            .lock()
            .await
            .plans
            .iter()
            .map(|(config, _)| config.clone())
            .collect()
    }

    /// Render the document, consuming the assembler.
    pub fn finalize(self, options: &RenderOptions) -> Result<String> {
        let entries = self.entries.into_inner();
        let document = render(&entries.plans, options);
        info!(images = entries.plans.len(), "Rendered pipeline document");
        Ok(serde_yaml::to_string(&Value::Mapping(document))?)
    }
}

fn render(plans: &[(PipelineConfig, EnvironmentBindings)], options: &RenderOptions) -> Mapping {
    if plans.is_empty() {
        return writer::nothing_to_do(options);
    }

    let mut document = writer::preamble(options);
    for (config, bindings) in plans {
        writer::append_jobs(&mut document, config, bindings, options);
    }
    document
}
