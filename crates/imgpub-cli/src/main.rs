//! imgpub - container image publisher
//!
//! ## Commands
//!
//! - `run`: reconcile every configured repository and write the pipeline
//! - `check-config`: load and validate a configuration without network access

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};

use imgpub_core::{PublisherConfig, Reconciler, RunOptions, RunReport};

const BANNER: &str = "------------------------------------------------------------";

#[derive(Parser)]
#[command(name = "imgpub")]
#[command(version = imgpub_core::VERSION)]
#[command(about = "Publish container images whose upstream CI passed", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile repositories and generate the downstream pipeline
    Run {
        /// Configuration file (YAML)
        config: PathBuf,

        /// Where to write the pipeline document
        #[arg(short, long, default_value = "generated-pipeline.yml")]
        output: PathBuf,

        /// Directory for per-image descriptor files
        #[arg(long, default_value = "pipeline_configs")]
        descriptors: PathBuf,

        /// Skip writing descriptor files
        #[arg(long)]
        no_descriptors: bool,

        /// Timeout of every HTTP request, in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,

        /// Base of the clone directory used inside generated jobs
        #[arg(long, default_value = "/tmp/imgpub")]
        clone_base: PathBuf,

        /// Container image the generated jobs run in
        #[arg(long, default_value = "docker:latest")]
        job_image: String,

        /// Runner tag for the generated jobs (repeatable)
        #[arg(long = "runner-tag")]
        runner_tags: Vec<String>,

        /// Write registry credentials into the document instead of
        /// expecting them as masked runner variables
        #[arg(long)]
        embed_secrets: bool,

        /// GitHub API base URL
        #[arg(long, env = "IMGPUB_GITHUB_API")]
        github_api: Option<String>,

        /// GitLab API base URL (derived from each repository otherwise)
        #[arg(long, env = "IMGPUB_GITLAB_API")]
        gitlab_api: Option<String>,
    },

    /// Validate a configuration file
    CheckConfig {
        /// Configuration file (YAML)
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    imgpub_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            config,
            output,
            descriptors,
            no_descriptors,
            timeout_secs,
            clone_base,
            job_image,
            runner_tags,
            embed_secrets,
            github_api,
            gitlab_api,
        } => {
            let mut options = RunOptions {
                timeout: Duration::from_secs(timeout_secs),
                output,
                descriptors: (!no_descriptors).then_some(descriptors),
                clone_base,
                ..RunOptions::default()
            };
            options.render.template.image = job_image;
            options.render.template.tags = runner_tags;
            options.render.embed_secrets = embed_secrets;
            if let Some(api) = github_api {
                options.ci_hosts.github_api = api;
            }
            options.ci_hosts.gitlab_api = gitlab_api;

            cmd_run(&config, options).await
        }
        Commands::CheckConfig { config } => cmd_check_config(&config),
    }
}

async fn cmd_run(config_path: &Path, options: RunOptions) -> Result<()> {
    let config = load(config_path)?;
    let reconciler =
        Reconciler::new(config, options).context("Failed to set up the reconciler")?;
    let outcome = reconciler.run().await.context("Reconciliation failed")?;

    println!("{BANNER}");
    print!("{}", outcome.document);
    println!("{BANNER}");

    let options = reconciler.options();
    outcome
        .write(&options.output, options.descriptors.as_deref())
        .with_context(|| format!("Failed to write {}", options.output.display()))?;

    print_report(&outcome.report);
    let failed = outcome.report.failures().count();
    if failed > 0 {
        bail!("{failed} repository(ies) failed, see the log above");
    }
    Ok(())
}

fn cmd_check_config(config_path: &Path) -> Result<()> {
    let config = load(config_path)?;
    println!(
        "✓ {} is valid: {} registries, {} repositories",
        config_path.display(),
        config.registries.len(),
        config.repositories.len()
    );
    for repository in &config.repositories {
        println!(
            "  {} ({}, branch {}) -> {}",
            repository.http_url_to_repo(),
            repository.host_type(),
            repository.branch,
            repository.registry.target
        );
    }
    Ok(())
}

fn load(config_path: &Path) -> Result<PublisherConfig> {
    let config = PublisherConfig::load(config_path)
        .with_context(|| format!("Invalid configuration {}", config_path.display()))?;
    info!(repositories = config.repositories.len(), "Configuration loaded");
    Ok(config)
}

fn print_report(report: &RunReport) {
    println!("Summary ({} image(s) queued):", report.queued_images());
    for entry in &report.repositories {
        println!("  {}: {}", entry.repository, entry.outcome);
    }
}
