//! Shell command templates for the generated pipeline stages.
//!
//! Commands reference `${SCCI_*}` variables that the downstream runner
//! expands. Before a stage is attached to a pipeline every such reference is
//! checked against the bindings produced for the image; variables outside
//! the namespace are left for the runner (e.g. its built-in CI variables).

use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use crate::domain::error::{PublishError, Result};
use crate::domain::{ImagePaths, ImageRef, RegistryEndpoint, RepositorySpec};

/// Namespace of every variable owned by imgpub.
pub const VARIABLE_PREFIX: &str = "SCCI";

pub const BRANCH: &str = "SCCI_BRANCH";
pub const REPO: &str = "SCCI_REPO";
pub const REPO_URL: &str = "SCCI_REPO_URL";
pub const CLONE_DIR: &str = "SCCI_CLONE_DIR";
pub const IMAGE_NAME: &str = "SCCI_IMAGE_NAME";
pub const TAG: &str = "SCCI_TAG";
pub const TEST_IMAGE: &str = "SCCI_TEST_IMAGE";
pub const RELEASE_IMAGE: &str = "SCCI_RELEASE_IMAGE";
pub const REGISTRY_ADDRESS: &str = "SCCI_TARGET_REGISTRY_ADDRESS";
pub const REGISTRY_USER: &str = "SCCI_TARGET_REGISTRY_USER";
pub const REGISTRY_PASSWORD: &str = "SCCI_TARGET_REGISTRY_PASSWORD";

pub type CommandList = Vec<String>;

const DOCKER_LOGIN: &str = "echo ${SCCI_TARGET_REGISTRY_PASSWORD} | docker login ${SCCI_TARGET_REGISTRY_ADDRESS} --username ${SCCI_TARGET_REGISTRY_USER} --password-stdin";
const CLONE: &str = "git clone --single-branch --branch ${SCCI_BRANCH} ${SCCI_REPO} ${SCCI_CLONE_DIR}";
const ENTER_CLONE: &str = "cd ${SCCI_CLONE_DIR}";
const TEST_IMAGE_REF: &str = "${SCCI_TARGET_REGISTRY_ADDRESS}/${SCCI_TEST_IMAGE}:${SCCI_TAG}";
const RELEASE_IMAGE_REF: &str = "${SCCI_TARGET_REGISTRY_ADDRESS}/${SCCI_RELEASE_IMAGE}:${SCCI_TAG}";
const LOCAL_IMAGE_REF: &str = "${SCCI_IMAGE_NAME}:${SCCI_TAG}";

/// One named value injected into a job.
#[derive(Clone, PartialEq, Eq)]
pub struct Binding {
    value: String,
    secret: bool,
}

impl Binding {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_secret(&self) -> bool {
        self.secret
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.secret {
            f.write_str("[REDACTED]")
        } else {
            write!(f, "{:?}", self.value)
        }
    }
}

/// Variables bound for one image's jobs, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentBindings {
    entries: BTreeMap<String, Binding>,
}

impl EnvironmentBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(
            name.into(),
            Binding {
                value: value.into(),
                secret: false,
            },
        );
    }

    /// Bind a value that must not be written to documents in cleartext.
    pub fn insert_secret(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(
            name.into(),
            Binding {
                value: value.into(),
                secret: true,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bindings for one image about to be rebuilt.
    pub fn for_image(
        repository: &RepositorySpec,
        registry: &RegistryEndpoint,
        image: &ImageRef,
        paths: &ImagePaths,
        clone_dir: &Path,
    ) -> Self {
        let mut bindings = Self::new();
        bindings.insert(BRANCH, &repository.branch);
        if repository.escaped_repo() == repository.http_url_to_repo() {
            bindings.insert(REPO, repository.escaped_repo());
        } else {
            bindings.insert_secret(REPO, repository.escaped_repo());
        }
        bindings.insert(REPO_URL, repository.http_url_to_repo());
        bindings.insert(CLONE_DIR, clone_dir.to_string_lossy());
        bindings.insert(IMAGE_NAME, &image.name);
        bindings.insert(TAG, &image.tag);
        bindings.insert(TEST_IMAGE, &paths.test);
        bindings.insert(RELEASE_IMAGE, &paths.release);
        bindings.insert(REGISTRY_ADDRESS, &registry.address);
        bindings.insert(REGISTRY_USER, &registry.user);
        bindings.insert_secret(REGISTRY_PASSWORD, registry.password.expose());
        bindings
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]*)\}").expect("placeholder pattern is valid"))
}

/// Checks command templates against bound variables.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    prefix: String,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new(VARIABLE_PREFIX)
    }
}

impl TemplateEngine {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Any name starting with the prefix is owned by imgpub, so typos such
    /// as `${SCCITAG}` are caught too.
    pub fn is_reserved(&self, name: &str) -> bool {
        name.starts_with(self.prefix.as_str())
    }

    /// Fail on the first `${PREFIX_*}` placeholder without a binding.
    ///
    /// Pure: nothing is substituted, expansion happens when the emitted
    /// pipeline runs.
    pub fn validate(&self, commands: &[String], bindings: &EnvironmentBindings) -> Result<()> {
        for command in commands {
            for capture in placeholder_pattern().captures_iter(command) {
                let name = &capture[1];
                if self.is_reserved(name) && !bindings.contains(name) {
                    return Err(PublishError::UnboundVariable {
                        variable: name.to_string(),
                        command: command.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Clone, log in, generate the compose spec, build, then push to the test path.
pub fn build_commands(repository: &RepositorySpec) -> CommandList {
    let mut commands = vec![
        CLONE.to_string(),
        ENTER_CLONE.to_string(),
        DOCKER_LOGIN.to_string(),
    ];
    if repository.legacy_escape {
        commands.push("ooil legacy-escape".to_string());
    }
    commands.push("ooil compose".to_string());
    commands.extend(repository.pre_docker_build_hooks.iter().cloned());
    commands.push("docker compose build".to_string());
    commands.push(format!("docker tag {LOCAL_IMAGE_REF} {TEST_IMAGE_REF}"));
    commands.push(format!("docker push {TEST_IMAGE_REF}"));
    commands
}

/// Pull the test image and run the repository's test script, if it has one.
pub fn test_commands(repository: &RepositorySpec) -> Option<CommandList> {
    let script = repository.ci_stage_test_script.as_ref()?;
    let mut commands = vec![
        CLONE.to_string(),
        ENTER_CLONE.to_string(),
        DOCKER_LOGIN.to_string(),
        format!("docker pull {TEST_IMAGE_REF}"),
        format!("docker tag {TEST_IMAGE_REF} {LOCAL_IMAGE_REF}"),
    ];
    commands.extend(script.iter().cloned());
    Some(commands)
}

/// Promote the tested image to its release path.
pub fn push_commands() -> CommandList {
    vec![
        DOCKER_LOGIN.to_string(),
        format!("docker pull {TEST_IMAGE_REF}"),
        format!("docker tag {TEST_IMAGE_REF} {RELEASE_IMAGE_REF}"),
        format!("docker push {RELEASE_IMAGE_REF}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Secret;

    fn repository(test_script: Option<Vec<&str>>) -> RepositorySpec {
        let mut yaml = String::from(
            r#"
address: https://gitlab.example.com/group/service.git
branch: master
host_type: gitlab
gitlab:
  personal_access_token: pat
  deploy_token_username: deploy
  deploy_token_password: secret
registry:
  target: master
  local_to_remote:
    local/app: remote/app
pre_docker_build_hooks:
  - make prepare
"#,
        );
        if let Some(script) = test_script {
            yaml.push_str("ci_stage_test_script:\n");
            for line in script {
                yaml.push_str(&format!("  - {line}\n"));
            }
        }
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn bindings() -> EnvironmentBindings {
        let repository = repository(None);
        let registry = RegistryEndpoint::new("registry.example.com", "bot", Secret::new("pw"));
        let image = ImageRef::parse("local/app:1.0.0").unwrap();
        let paths = ImagePaths {
            test: "test/app".to_string(),
            release: "release/app".to_string(),
        };
        EnvironmentBindings::for_image(
            &repository,
            &registry,
            &image,
            &paths,
            Path::new("/tmp/imgpub/local-app"),
        )
    }

    #[test]
    fn test_unset_reserved_variable_fails() {
        let engine = TemplateEngine::default();
        let commands = vec!["echo ${SCCI_UNSET}".to_string()];
        let err = engine.validate(&commands, &bindings()).unwrap_err();
        match err {
            PublishError::UnboundVariable { variable, command } => {
                assert_eq!(variable, "SCCI_UNSET");
                assert_eq!(command, "echo ${SCCI_UNSET}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_foreign_variables_pass() {
        let engine = TemplateEngine::default();
        let commands = vec![
            "echo ${OTHER_VAR}".to_string(),
            "echo ${CI_COMMIT_SHA} ${XSCCI_NOT_OURS}".to_string(),
        ];
        assert!(engine
            .validate(&commands, &EnvironmentBindings::new())
            .is_ok());
    }

    #[test]
    fn test_prefix_without_separator_is_reserved() {
        let engine = TemplateEngine::default();
        assert!(engine.is_reserved("SCCIFOO"));
        assert!(engine.is_reserved("SCCI_TAG"));
        assert!(!engine.is_reserved("CI_SCCI"));

        let commands = vec!["echo ${SCCIFOO}".to_string()];
        let err = engine.validate(&commands, &bindings()).unwrap_err();
        assert!(matches!(
            err,
            PublishError::UnboundVariable { ref variable, .. } if variable == "SCCIFOO"
        ));
    }

    #[test]
    fn test_custom_prefix() {
        let engine = TemplateEngine::new("PUB");
        let commands = vec!["echo ${PUB_MISSING} ${SCCI_IGNORED}".to_string()];
        let err = engine
            .validate(&commands, &EnvironmentBindings::new())
            .unwrap_err();
        assert!(err.to_string().contains("PUB_MISSING"));
    }

    #[test]
    fn test_generated_stages_are_fully_bound() {
        let engine = TemplateEngine::default();
        let bindings = bindings();
        let repository = repository(Some(vec!["pytest -v ${SCCI_IMAGE_NAME}"]));

        engine
            .validate(&build_commands(&repository), &bindings)
            .unwrap();
        engine
            .validate(&test_commands(&repository).unwrap(), &bindings)
            .unwrap();
        engine.validate(&push_commands(), &bindings).unwrap();
    }

    #[test]
    fn test_user_script_with_unknown_variable_fails() {
        let engine = TemplateEngine::default();
        let repository = repository(Some(vec!["run ${SCCI_TYPO}"]));
        let err = engine
            .validate(&test_commands(&repository).unwrap(), &bindings())
            .unwrap_err();
        assert!(err.to_string().contains("SCCI_TYPO"));
    }

    #[test]
    fn test_build_commands_order() {
        let commands = build_commands(&repository(None));
        let compose = commands.iter().position(|c| c == "ooil compose").unwrap();
        let hook = commands.iter().position(|c| c == "make prepare").unwrap();
        let build = commands
            .iter()
            .position(|c| c == "docker compose build")
            .unwrap();
        assert!(commands[0].starts_with("git clone"));
        assert!(compose < hook && hook < build);
        assert!(commands.last().unwrap().starts_with("docker push"));
        assert!(!commands.iter().any(|c| c == "ooil legacy-escape"));
    }

    #[test]
    fn test_legacy_escape_precedes_compose() {
        let mut repository = repository(None);
        repository.legacy_escape = true;
        let commands = build_commands(&repository);
        let escape = commands
            .iter()
            .position(|c| c == "ooil legacy-escape")
            .unwrap();
        let compose = commands.iter().position(|c| c == "ooil compose").unwrap();
        assert_eq!(escape + 1, compose);
    }

    #[test]
    fn test_test_commands_only_with_script() {
        assert!(test_commands(&repository(None)).is_none());
        let commands = test_commands(&repository(Some(vec!["make test"]))).unwrap();
        assert_eq!(commands.last().unwrap(), "make test");
    }

    #[test]
    fn test_secret_bindings_are_flagged() {
        let bindings = bindings();
        assert!(bindings.get(REGISTRY_PASSWORD).unwrap().is_secret());
        assert!(bindings.get(REPO).unwrap().is_secret());
        assert!(!bindings.get(REPO_URL).unwrap().is_secret());
        assert_eq!(
            bindings.get(REPO_URL).unwrap().value(),
            "https://gitlab.example.com/group/service.git"
        );
        assert!(!format!("{bindings:?}").contains("pw"));
    }
}
