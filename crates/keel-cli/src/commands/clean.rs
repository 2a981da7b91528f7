use keel_build::context::{CONTEXT_DIR, remove_context};
use keel_core::KeelConfig;
use keel_docker::DockerClient;
use std::path::PathBuf;

use super::resolve_tag;

pub async fn clean(image: bool) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");

    if remove_context(&project_dir)? {
        println!("Removed {CONTEXT_DIR}/");
    } else {
        println!("No staged context to remove");
    }

    if image {
        let config = KeelConfig::load(&project_dir)?;
        let tag = resolve_tag(None, &config, &project_dir)?;
        let client = DockerClient::new();
        if client.image_exists(&tag).await {
            client.remove_image(&tag).await?;
            println!("Removed image {tag}");
        } else {
            println!("Image {tag} not found");
        }
    }

    Ok(())
}
