//! Target registries.

use serde::Deserialize;
use std::collections::BTreeSet;

use crate::domain::secret::Secret;

/// Tags present at one registry path.
pub type TagSet = BTreeSet<String>;

/// A container registry and the account used to talk to it.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEndpoint {
    /// Host (and optional port) without scheme, e.g. `registry.example.com`.
    pub address: String,
    pub user: String,
    pub password: Secret,
}

impl RegistryEndpoint {
    pub fn new(address: impl Into<String>, user: impl Into<String>, password: Secret) -> Self {
        Self {
            address: address.into(),
            user: user.into(),
            password,
        }
    }
}
