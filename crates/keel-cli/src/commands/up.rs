use anyhow::Context;
use keel_core::{KeelConfig, ensure_dir};
use keel_docker::{DataMount, DockerClient};
use std::path::PathBuf;

use super::resolve_tag;

/// Run the built image and return the container's exit code.
pub async fn up(tag: Option<String>, data: Option<PathBuf>) -> anyhow::Result<i32> {
    let project_dir = PathBuf::from(".");
    let config = KeelConfig::load(&project_dir)?;
    let tag = resolve_tag(tag, &config, &project_dir)?;

    let client = DockerClient::new();
    if !client.image_exists(&tag).await {
        anyhow::bail!("image {tag} not found. Run `keel build` first.");
    }

    let mount = match data {
        Some(dir) => {
            ensure_dir(&dir)?;
            let host = dir
                .canonicalize()
                .with_context(|| format!("failed to resolve {}", dir.display()))?;
            Some(DataMount {
                host,
                container: config.container_data_dir(),
            })
        }
        None => None,
    };

    Ok(client.run_container(&tag, mount.as_ref()).await?)
}
