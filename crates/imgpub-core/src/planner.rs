//! Build-or-skip decisions for images produced by a repository.
//!
//! Reconciling twice against an unchanged commit and an already populated
//! registry yields nothing to build on the second pass.

use tracing::{debug, info};

use crate::domain::error::Result;
use crate::domain::{ImageMapping, ImagePaths, ImageRef, Resolution, TagSet};
use crate::registry::TagLookup;

/// Why an image does not need to be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Listed in `skip_images`; only needed to build other images.
    DependencyOnly,
    /// The requested tag is already published at the release path.
    AlreadyPublished { release: String },
}

/// Decision for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Skip(SkipReason),
    Build(ImagePaths),
}

impl Action {
    pub fn is_build(&self) -> bool {
        matches!(self, Action::Build(_))
    }
}

/// Decide from an already known tag set.
pub fn decide(paths: ImagePaths, tag: &str, published: &TagSet) -> Action {
    if published.contains(tag) {
        Action::Skip(SkipReason::AlreadyPublished {
            release: paths.release,
        })
    } else {
        Action::Build(paths)
    }
}

/// Resolve `image` through `mapping` and compare against the registry.
///
/// An image missing from the mapping is a configuration error and aborts
/// the repository.
pub async fn plan(
    mapping: &ImageMapping,
    image: &ImageRef,
    registry: &dyn TagLookup,
) -> Result<Action> {
    let paths = match mapping.resolve(&image.name)? {
        Resolution::DependencyOnly => {
            debug!(image = %image, "Dependency-only image, not gated");
            return Ok(Action::Skip(SkipReason::DependencyOnly));
        }
        Resolution::Gated(paths) => paths,
    };

    let published = registry.tags(&paths.release).await?;
    debug!(image = %image, release = %paths.release, tags = ?published, "Checked published tags");

    let action = decide(paths, &image.tag, &published);
    match &action {
        Action::Build(paths) => info!(image = %image, release = %paths.release, "Will build image"),
        Action::Skip(reason) => info!(image = %image, ?reason, "Image already present, skipping"),
    }
    Ok(action)
}
