//! End-to-end reconciliation against mocked CI and registry hosts.

use async_trait::async_trait;
use imgpub_core::pipeline::writer::NOTHING_TO_DO_JOB;
use imgpub_core::{
    CiHosts, CommitRef, ImageRef, PublisherConfig, Reconciler, RepositoryOutcome,
    RepositorySpec, Result, RunOptions, SourceHost,
};
use serde_json::json;
use serde_yaml::Mapping;
use std::collections::HashMap;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HASH: &str = "3f1c2a9d8e7b6a5f4e3d2c1b0a9f8e7d6c5b4a39";
const APP: &str = "https://github.com/org/app.git";
const TOOLS: &str = "https://github.com/org/tools.git";
const PASSWORD: &str = "registry-password-42";

/// Source host answering from memory instead of git and ooil.
struct FakeSource {
    images: HashMap<String, Vec<&'static str>>,
}

#[async_trait]
impl SourceHost for FakeSource {
    async fn branch_head(&self, repository: &RepositorySpec) -> Result<CommitRef> {
        CommitRef::new(repository.http_url_to_repo(), &repository.branch, HASH)
    }

    async fn images(&self, repository: &RepositorySpec) -> Result<Vec<ImageRef>> {
        self.images
            .get(&repository.address)
            .into_iter()
            .flatten()
            .map(|image| ImageRef::parse(image))
            .collect()
    }
}

fn source() -> FakeSource {
    let mut images = HashMap::new();
    images.insert(
        APP.to_string(),
        vec!["simcore/services/dynamic/app:2.0.5", "simcore/base:1.0.0"],
    );
    images.insert(TOOLS.to_string(), vec!["org/tools:0.1.0"]);
    FakeSource { images }
}

fn config(registry: &MockServer, with_tools: bool) -> PublisherConfig {
    let tools = if with_tools {
        format!(
            r#"
  - address: {TOOLS}
    branch: master
    host_type: github
    github:
      github_token: gh-token
    registry:
      target: master
      local_to_remote:
        org/tools: release/tools
"#
        )
    } else {
        String::new()
    };
    let text = format!(
        r#"
registries:
  master:
    address: {address}
    user: admin
    password: ${{REGISTRY_PASSWORD}}
repositories:
  - address: {APP}
    branch: master
    host_type: github
    github:
      github_token: gh-token
    registry:
      target: master
      local_to_test:
        simcore/services/dynamic/app: test/app
      test_to_release:
        test/app: release/app
      skip_images:
        - simcore/base
    ci_stage_test_script:
      - pytest
{tools}"#,
        address = registry.uri(),
    );
    PublisherConfig::from_yaml_str(&text, |name| {
        (name == "REGISTRY_PASSWORD").then(|| PASSWORD.to_string())
    })
    .unwrap()
}

fn options(ci: &MockServer) -> RunOptions {
    RunOptions {
        ci_hosts: CiHosts {
            github_api: ci.uri(),
            gitlab_api: None,
        },
        ..RunOptions::default()
    }
}

async fn mount_ci(ci: &MockServer, slug: &str, conclusion: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{slug}/actions/runs")))
        .and(query_param("branch", "master"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workflow_runs": [{
                "head_commit": { "id": HASH },
                "head_branch": "master",
                "status": "completed",
                "conclusion": conclusion,
            }]
        })))
        .mount(ci)
        .await;
}

async fn mount_tags(registry: &MockServer, release: &str, tags: &[&str]) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/{release}/tags/list")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "name": release, "tags": tags })),
        )
        .mount(registry)
        .await;
}

fn jobs(document: &str) -> Mapping {
    serde_yaml::from_str(document).unwrap()
}

#[tokio::test]
async fn test_second_run_against_populated_registry_is_a_no_op() {
    let ci = MockServer::start().await;
    let registry = MockServer::start().await;
    mount_ci(&ci, "org/app", "success").await;
    mount_tags(&registry, "release/app", &[]).await;

    let reconciler = Reconciler::with_source(config(&registry, false), options(&ci), source())
        .unwrap();

    let first = reconciler.run().await.unwrap();
    let document = jobs(&first.document);
    assert!(document.contains_key("simcore-services-dynamic-app-build"));
    assert!(document.contains_key("simcore-services-dynamic-app-test"));
    assert!(document.contains_key("simcore-services-dynamic-app-push"));
    assert!(!document.contains_key("simcore-base-build"));
    assert_eq!(
        first.report.repositories[0].outcome,
        RepositoryOutcome::Queued {
            images: vec!["simcore/services/dynamic/app:2.0.5".to_string()]
        }
    );

    // The pipeline ran and published the image.
    registry.reset().await;
    mount_tags(&registry, "release/app", &["2.0.4", "2.0.5"]).await;

    let second = reconciler.run().await.unwrap();
    let document = jobs(&second.document);
    assert_eq!(document.len(), 2);
    assert!(document.contains_key(NOTHING_TO_DO_JOB));
    assert!(second.configs.is_empty());
    assert_eq!(
        second.report.repositories[0].outcome,
        RepositoryOutcome::UpToDate
    );
}

#[tokio::test]
async fn test_failed_ci_schedules_nothing() {
    let ci = MockServer::start().await;
    let registry = MockServer::start().await;
    mount_ci(&ci, "org/app", "failure").await;

    let reconciler = Reconciler::with_source(config(&registry, false), options(&ci), source())
        .unwrap();
    let outcome = reconciler.run().await.unwrap();

    assert_eq!(
        outcome.report.repositories[0].outcome,
        RepositoryOutcome::CiNotPassed {
            commit: HASH.to_string()
        }
    );
    assert!(jobs(&outcome.document).contains_key(NOTHING_TO_DO_JOB));
    assert!(registry.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_ci_run_fails_only_that_repository() {
    let ci = MockServer::start().await;
    let registry = MockServer::start().await;
    // org/app has no runs at all, org/tools is green.
    Mock::given(method("GET"))
        .and(path("/repos/org/app/actions/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "workflow_runs": [] })))
        .mount(&ci)
        .await;
    mount_ci(&ci, "org/tools", "success").await;
    mount_tags(&registry, "release/tools", &["0.0.9"]).await;

    let reconciler = Reconciler::with_source(config(&registry, true), options(&ci), source())
        .unwrap();
    let outcome = reconciler.run().await.unwrap();

    assert!(outcome.report.has_failures());
    match &outcome.report.repositories[0].outcome {
        RepositoryOutcome::Failed {
            error,
            configuration,
        } => {
            assert!(error.contains("org/app"));
            assert!(!configuration);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(
        outcome.report.repositories[1].outcome,
        RepositoryOutcome::Queued {
            images: vec!["org/tools:0.1.0".to_string()]
        }
    );
    assert!(jobs(&outcome.document).contains_key("org-tools-push"));
}

#[tokio::test]
async fn test_registry_password_stays_out_of_the_document() {
    let ci = MockServer::start().await;
    let registry = MockServer::start().await;
    mount_ci(&ci, "org/app", "success").await;
    mount_tags(&registry, "release/app", &[]).await;

    let reconciler = Reconciler::with_source(config(&registry, false), options(&ci), source())
        .unwrap();
    let outcome = reconciler.run().await.unwrap();

    assert!(!outcome.document.contains(PASSWORD));
    assert!(outcome
        .document
        .contains("${SCCI_TARGET_REGISTRY_PASSWORD}"));

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("generated-pipeline.yml");
    let descriptors = dir.path().join("pipeline_configs");
    outcome.write(&output, Some(&descriptors)).unwrap();
    let descriptor = std::fs::read_to_string(
        descriptors.join("simcore-services-dynamic-app.pipeline_config"),
    )
    .unwrap();
    assert!(!descriptor.contains(PASSWORD));
}

#[tokio::test]
async fn test_image_shared_by_two_services_is_planned_once() {
    let ci = MockServer::start().await;
    let registry = MockServer::start().await;
    mount_ci(&ci, "org/app", "success").await;
    mount_tags(&registry, "release/app", &[]).await;

    let mut images = HashMap::new();
    images.insert(
        APP.to_string(),
        vec![
            "simcore/services/dynamic/app:2.0.5",
            "simcore/base:1.0.0",
            "simcore/services/dynamic/app:2.0.5",
        ],
    );
    let reconciler =
        Reconciler::with_source(config(&registry, false), options(&ci), FakeSource { images })
            .unwrap();
    let outcome = reconciler.run().await.unwrap();

    assert!(!outcome.report.has_failures());
    assert_eq!(outcome.configs.len(), 1);
    assert_eq!(
        outcome.report.repositories[0].outcome,
        RepositoryOutcome::Queued {
            images: vec!["simcore/services/dynamic/app:2.0.5".to_string()]
        }
    );
}
