//! Domain models for imgpub.
//!
//! - `RepositorySpec`: a configured source repository
//! - `CommitRef`: a branch head at a full sha
//! - `ImageMapping`: local → test → release image paths
//! - `RegistryEndpoint` / `TagSet`: registry state

pub mod commit;
pub mod error;
pub mod mapping;
pub mod registry;
pub mod repository;
pub mod secret;

pub use commit::{CommitRef, COMMIT_HASH_LEN};
pub use error::{PublishError, Result};
pub use mapping::{
    ImageMapping, ImagePaths, ImageRef, RegistryTarget, Resolution, TieredMapping,
};
pub use registry::{RegistryEndpoint, TagSet};
pub use repository::{
    ClonedWorkspace, GitHubCredentials, GitLabCredentials, HostCredentials, HostType,
    RepositorySpec,
};
pub use secret::Secret;
