//! Compose-spec generation with `ooil` and image extraction.

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::path::Path;

use crate::domain::error::{PublishError, Result};
use crate::domain::{ClonedWorkspace, ImageRef};
use crate::process::command_output;

pub const COMPOSE_FILE: &str = "docker-compose.yml";

#[derive(Debug, Deserialize)]
struct ComposeSpec {
    #[serde(default)]
    services: Mapping,
}

/// Run `ooil compose` inside the clone.
pub async fn generate(workspace: &ClonedWorkspace<'_>) -> Result<()> {
    command_output("ooil", &["compose"], Some(workspace.path()), &[]).await?;
    Ok(())
}

/// `services.*.image` of a compose document, in document order.
pub fn parse_images(text: &str) -> Result<Vec<ImageRef>> {
    let spec: ComposeSpec = serde_yaml::from_str(text)?;
    spec.services
        .iter()
        .map(|(name, service)| {
            let image = service.get("image").and_then(Value::as_str).ok_or_else(|| {
                PublishError::Config(format!(
                    "service '{}' in {COMPOSE_FILE} declares no image",
                    name.as_str().unwrap_or("?")
                ))
            })?;
            ImageRef::parse(image)
        })
        .collect()
}

/// Read the images of the compose file generated in `dir`.
pub fn read_images(dir: &Path) -> Result<Vec<ImageRef>> {
    let text = std::fs::read_to_string(dir.join(COMPOSE_FILE))?;
    parse_images(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSE: &str = r#"
version: "3.7"
services:
  jupyter-math:
    build:
      context: ./docker
    image: simcore/services/dynamic/jupyter-math:2.0.5
  base:
    image: simcore/services/dynamic/base:1.0.0
"#;

    #[test]
    fn test_images_in_document_order() {
        let images = parse_images(COMPOSE).unwrap();
        let names: Vec<String> = images.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec![
                "simcore/services/dynamic/jupyter-math:2.0.5",
                "simcore/services/dynamic/base:1.0.0",
            ]
        );
    }

    #[test]
    fn test_service_without_image_fails() {
        let err = parse_images("services:\n  app:\n    build: .\n").unwrap_err();
        assert!(err.to_string().contains("app"));
    }

    #[test]
    fn test_untagged_image_fails() {
        let err = parse_images("services:\n  app:\n    image: org/app\n").unwrap_err();
        assert!(matches!(err, PublishError::InvalidImageReference(_)));
    }

    #[test]
    fn test_read_images_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(COMPOSE_FILE), COMPOSE).unwrap();
        assert_eq!(read_images(dir.path()).unwrap().len(), 2);
    }
}
