//! How a locally built image name maps to the paths it is published under.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::error::{PublishError, Result};

/// Mapping from local image names to registry paths.
///
/// Two shapes are supported:
/// - `Direct`: one remote path per local image, used for both the
///   intermediate push and the release.
/// - `Tiered`: local → test → release, plus a set of local names that only
///   exist as build dependencies and are never published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageMapping {
    Direct {
        local_to_remote: BTreeMap<String, String>,
    },
    Tiered(TieredMapping),
}

/// Maps of a three-tier mapping. Only obtainable through
/// [`ImageMapping::tiered`], so the cross-map checks always hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieredMapping {
    local_to_test: BTreeMap<String, String>,
    test_to_release: BTreeMap<String, String>,
    skip_images: BTreeSet<String>,
}

impl TieredMapping {
    pub fn local_to_test(&self) -> &BTreeMap<String, String> {
        &self.local_to_test
    }

    pub fn test_to_release(&self) -> &BTreeMap<String, String> {
        &self.test_to_release
    }

    pub fn skip_images(&self) -> &BTreeSet<String> {
        &self.skip_images
    }
}

/// Registry paths an image goes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePaths {
    /// Intermediate path the build stage pushes to.
    pub test: String,
    /// Final path, also the path checked for existing tags.
    pub release: String,
}

/// Outcome of looking a local image name up in the mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Build dependency only; excluded from tag reconciliation.
    DependencyOnly,
    Gated(ImagePaths),
}

impl ImageMapping {
    pub fn direct(local_to_remote: BTreeMap<String, String>) -> Self {
        ImageMapping::Direct { local_to_remote }
    }

    /// Build a three-tier mapping, enforcing that both maps have the same
    /// cardinality and that every test path has a release path.
    pub fn tiered(
        local_to_test: BTreeMap<String, String>,
        test_to_release: BTreeMap<String, String>,
        skip_images: BTreeSet<String>,
    ) -> Result<Self> {
        if local_to_test.len() != test_to_release.len() {
            return Err(PublishError::InvalidMapping(format!(
                "local_to_test has {} entries but test_to_release has {}; they must match",
                local_to_test.len(),
                test_to_release.len()
            )));
        }

        if let Some((local, test)) = local_to_test
            .iter()
            .find(|(_, test)| !test_to_release.contains_key(*test))
        {
            return Err(PublishError::InvalidMapping(format!(
                "test image '{test}' (from local image '{local}') has no entry in test_to_release"
            )));
        }

        Ok(ImageMapping::Tiered(TieredMapping {
            local_to_test,
            test_to_release,
            skip_images,
        }))
    }

    /// Resolve a local image name to its registry paths.
    pub fn resolve(&self, local_name: &str) -> Result<Resolution> {
        match self {
            ImageMapping::Direct { local_to_remote } => local_to_remote
                .get(local_name)
                .map(|remote| {
                    Resolution::Gated(ImagePaths {
                        test: remote.clone(),
                        release: remote.clone(),
                    })
                })
                .ok_or_else(|| incomplete(local_name, "local_to_remote", local_to_remote.keys())),
            ImageMapping::Tiered(TieredMapping {
                local_to_test,
                test_to_release,
                skip_images,
            }) => {
                if skip_images.contains(local_name) {
                    return Ok(Resolution::DependencyOnly);
                }
                let test = local_to_test
                    .get(local_name)
                    .ok_or_else(|| incomplete(local_name, "local_to_test", local_to_test.keys()))?;
                // guaranteed by `tiered`
                let release = test_to_release
                    .get(test)
                    .ok_or_else(|| incomplete(test, "test_to_release", test_to_release.keys()))?;
                Ok(Resolution::Gated(ImagePaths {
                    test: test.clone(),
                    release: release.clone(),
                }))
            }
        }
    }
}

fn incomplete<'a>(
    image: &str,
    field: &str,
    declared: impl Iterator<Item = &'a String>,
) -> PublishError {
    let declared: Vec<&str> = declared.map(String::as_str).collect();
    PublishError::MappingIncomplete {
        image: image.to_string(),
        hint: format!("add it to '{field}', currently declared: [{}]", declared.join(", ")),
    }
}

/// The `registry` section of a repository: which configured registry to
/// publish to and how images map onto it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawRegistryTarget")]
pub struct RegistryTarget {
    /// Key into the configured registries.
    pub target: String,
    pub mapping: ImageMapping,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRegistryTarget {
    target: String,
    #[serde(default)]
    local_to_remote: Option<BTreeMap<String, String>>,
    #[serde(default)]
    local_to_test: Option<BTreeMap<String, String>>,
    #[serde(default)]
    test_to_release: Option<BTreeMap<String, String>>,
    #[serde(default)]
    skip_images: BTreeSet<String>,
}

impl TryFrom<RawRegistryTarget> for RegistryTarget {
    type Error = PublishError;

    fn try_from(raw: RawRegistryTarget) -> Result<Self> {
        let mapping = match (raw.local_to_remote, raw.local_to_test, raw.test_to_release) {
            (Some(local_to_remote), None, None) => {
                if !raw.skip_images.is_empty() {
                    return Err(PublishError::InvalidMapping(
                        "skip_images is only supported with local_to_test/test_to_release"
                            .to_string(),
                    ));
                }
                ImageMapping::direct(local_to_remote)
            }
            (None, Some(local_to_test), Some(test_to_release)) => {
                ImageMapping::tiered(local_to_test, test_to_release, raw.skip_images)?
            }
            _ => {
                return Err(PublishError::InvalidMapping(format!(
                    "registry target '{}' needs either local_to_remote or both \
                     local_to_test and test_to_release",
                    raw.target
                )))
            }
        };
        Ok(RegistryTarget {
            target: raw.target,
            mapping,
        })
    }
}

/// A `name:tag` pair as found in a compose specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    /// Split on the last `:`; a colon belonging to a registry port is not a tag.
    pub fn parse(reference: &str) -> Result<Self> {
        match reference.rsplit_once(':') {
            Some((name, tag)) if !name.is_empty() && !tag.is_empty() && !tag.contains('/') => {
                Ok(Self {
                    name: name.to_string(),
                    tag: tag.to_string(),
                })
            }
            _ => Err(PublishError::InvalidImageReference(reference.to_string())),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}
