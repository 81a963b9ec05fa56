//! Commit references resolved from the source host.

use serde::Serialize;
use std::fmt;

use crate::domain::error::{PublishError, Result};

/// Length of a full git sha-1 in hexadecimal.
pub const COMMIT_HASH_LEN: usize = 40;

/// A branch head at a specific commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRef {
    repository: String,
    branch: String,
    hash: String,
}

impl CommitRef {
    /// Build a commit reference, rejecting anything that is not a full sha.
    pub fn new(
        repository: impl Into<String>,
        branch: impl Into<String>,
        hash: impl Into<String>,
    ) -> Result<Self> {
        let hash = hash.into();
        if hash.len() != COMMIT_HASH_LEN || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PublishError::CommitHashInvalid(hash));
        }
        Ok(Self {
            repository: repository.into(),
            branch: branch.into(),
            hash,
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.repository, self.branch, self.hash)
    }
}
