//! Per-deployment image names for compose projects.
//!
//! Every service with a `build` section gets its image pinned to the deployment's tag through
//! an override file, so an older deployment can be brought back by image rather than by
//! rebuilding whatever source happens to be checked out.

use super::{CommandExecutor, CommandSpec};
use crate::context::sanitize_project_name;
use crate::errors::PipelineError;
use serde_json::{json, Map, Value};
use std::path::Path;

pub const COMPOSE_OVERRIDE: &str = "docker-compose.dockhand.yml";

/// `shop-main:1a2b3c4d` and `web` give `shop-main-web:1a2b3c4d`.
pub fn service_image(image_name: &str, service: &str) -> String {
    let service = sanitize_project_name(service);
    match image_name.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => format!("{}-{}:{}", repo, service, tag),
        _ => format!("{}-{}", image_name, service),
    }
}

/// Services of a `docker compose config --format json` document that are built from source.
pub fn built_services(config: &str) -> Result<Vec<String>, PipelineError> {
    let document: Value = serde_json::from_str(config)
        .map_err(|err| PipelineError::Validation(format!("unreadable compose config: {}", err)))?;
    let services = document
        .get("services")
        .and_then(Value::as_object)
        .ok_or_else(|| PipelineError::Validation("compose config has no services".to_string()))?;

    Ok(services
        .iter()
        .filter(|(_, service)| service.get("build").is_some())
        .map(|(name, _)| name.clone())
        .collect())
}

/// JSON is valid YAML, so compose reads this as an ordinary override file.
fn render_override(pinned: &[(String, String)]) -> Result<String, PipelineError> {
    let services: Map<String, Value> = pinned
        .iter()
        .map(|(service, image)| (service.clone(), json!({ "image": image })))
        .collect();
    serde_json::to_string_pretty(&json!({ "services": services }))
        .map_err(|err| PipelineError::Validation(err.to_string()))
}

/// Write the override pinning `compose_file`'s built services to `image_name`'s tag.
/// Returns the pinned images.
#[tracing::instrument(name = "Pin compose images", skip(executor, path))]
pub async fn pin_images(
    executor: &dyn CommandExecutor,
    path: &Path,
    project_name: &str,
    compose_file: &str,
    image_name: &str,
) -> Result<Vec<String>, PipelineError> {
    let config = CommandSpec::docker([
        "compose",
        "-p",
        project_name,
        "-f",
        compose_file,
        "config",
        "--format",
        "json",
    ])
    .current_dir(path);
    let services = built_services(&executor.run(&config).await?)?;

    let pinned: Vec<(String, String)> = services
        .into_iter()
        .map(|service| {
            let image = service_image(image_name, &service);
            (service, image)
        })
        .collect();
    tokio::fs::write(path.join(COMPOSE_OVERRIDE), render_override(&pinned)?).await?;

    Ok(pinned.into_iter().map(|(_, image)| image).collect())
}
