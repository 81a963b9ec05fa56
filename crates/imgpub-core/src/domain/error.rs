//! Error taxonomy for a publishing run.
//!
//! Three families are kept apart so callers can tell "the configuration is
//! wrong" from "we asked and got an authoritative empty answer" from "we could
//! not get an answer at all".

/// imgpub domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    // --- configuration -----------------------------------------------------
    #[error("invalid image mapping: {0}")]
    InvalidMapping(String),

    #[error("repository {address}: host type '{host_type}' requires a '{field}' section")]
    MissingCredentials {
        address: String,
        host_type: String,
        field: String,
    },

    #[error("image '{image}' is not declared in the image mapping ({hint})")]
    MappingIncomplete { image: String, hint: String },

    #[error("invalid image reference '{0}': expected <name>:<tag>")]
    InvalidImageReference(String),

    #[error("repository {repository}: registry target '{target}' is not defined in registries")]
    UnknownRegistry { repository: String, target: String },

    #[error("pipeline target '{0}' was already added; two images normalise to the same job name")]
    DuplicateTarget(String),

    #[error("configuration error: {0}")]
    Config(String),

    // --- command templates -------------------------------------------------
    #[error("variable '{variable}' used in '{command}' has no binding")]
    UnboundVariable { variable: String, command: String },

    // --- semantic absence --------------------------------------------------
    #[error("commit hash '{0}' is not a 40 character hexadecimal sha")]
    CommitHashInvalid(String),

    #[error(
        "no green CI run found for branch '{branch}' at '{commit}' in {repository}; \
         ensure the repository has a passing CI run on that branch"
    )]
    CiResultMissing {
        repository: String,
        branch: String,
        commit: String,
    },

    #[error("gitlab project not found: {0}")]
    ProjectNotFound(String),

    #[error("no gitlab pipeline found for commit {commit} in {repository}")]
    PipelineNotFound { repository: String, commit: String },

    // --- transport and io --------------------------------------------------
    #[error("request to {url} failed with status {status}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("command '{command}' failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PublishError {
    /// Whether this error stems from the run configuration rather than from
    /// the state of a remote system.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PublishError::InvalidMapping(_)
                | PublishError::MissingCredentials { .. }
                | PublishError::MappingIncomplete { .. }
                | PublishError::InvalidImageReference(_)
                | PublishError::UnknownRegistry { .. }
                | PublishError::DuplicateTarget(_)
                | PublishError::Config(_)
                | PublishError::UnboundVariable { .. }
        )
    }

    /// Whether a remote system answered authoritatively that the thing we
    /// asked for does not exist.
    pub fn is_absence(&self) -> bool {
        matches!(
            self,
            PublishError::CommitHashInvalid(_)
                | PublishError::CiResultMissing { .. }
                | PublishError::ProjectNotFound(_)
                | PublishError::PipelineNotFound { .. }
        )
    }
}

/// Result type for imgpub operations.
pub type Result<T> = std::result::Result<T, PublishError>;
