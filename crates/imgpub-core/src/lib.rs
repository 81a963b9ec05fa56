//! imgpub core library
//!
//! Gates container image publication on upstream CI, reconciles the images a
//! repository produces against a registry and synthesizes the downstream
//! build/test/push pipeline for whatever is missing.

pub mod ci;
pub mod commands;
pub mod compose;
pub mod config;
pub mod domain;
pub mod git;
pub mod http;
pub mod pipeline;
pub mod planner;
pub mod process;
pub mod registry;
pub mod run;
pub mod telemetry;

pub use ci::{CiHosts, CiOracle};
pub use commands::{EnvironmentBindings, TemplateEngine, VARIABLE_PREFIX};
pub use config::{PublisherConfig, RunOptions};
pub use domain::{
    ClonedWorkspace, CommitRef, ImageMapping, ImagePaths, ImageRef, PublishError,
    RegistryEndpoint, RepositorySpec, Result, Secret, TagSet,
};
pub use pipeline::{PipelineAssembler, PipelineConfig, RenderOptions, StageTemplate};
pub use planner::{Action, SkipReason};
pub use registry::{RegistryClient, TagLookup};
pub use run::{
    GitSource, Reconciler, RepositoryOutcome, RepositoryReport, RunOutcome, RunReport,
    SourceHost,
};
pub use telemetry::init_tracing;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
