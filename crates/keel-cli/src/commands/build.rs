use keel_build::context::{application_files, create_context};
use keel_build::eject as eject_mod;
use keel_build::{BuildError, BuildPlan, DockerfileGenerator};
use keel_core::{DependencyManifest, KeelConfig};
use keel_docker::DockerClient;
use std::path::PathBuf;

use super::resolve_tag;

/// Stage the build context and build the image.
pub async fn build(tag: Option<String>, no_cache: bool) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = KeelConfig::load(&project_dir)?;

    // Missing or malformed manifest fails here, before docker is involved
    let manifest = DependencyManifest::load(&project_dir.join(&config.build.manifest))?;
    if manifest.is_empty() {
        tracing::warn!(manifest = %config.build.manifest, "dependency manifest declares no packages");
    }

    let plan = BuildPlan::from_config(&config.build)?;
    let tag = resolve_tag(tag, &config, &project_dir)?;

    let dockerfile_content = if eject_mod::is_ejected(&project_dir) {
        println!("Using ejected Dockerfile from .keel/Dockerfile");
        eject_mod::load_ejected_dockerfile(&project_dir)?
    } else {
        DockerfileGenerator::new(&config, &plan).render()
    };

    println!("Staging build context...");
    let files = application_files(&project_dir, &config.build.data_dir)?;
    let context_dir = create_context(
        &project_dir,
        &files,
        &config.build.manifest,
        &dockerfile_content,
    )?;
    tracing::debug!(files = files.len(), "context staged");

    println!("Building {tag}...");
    let client = DockerClient::new();
    if let Err(e) = client.build_image(&context_dir, &tag, no_cache).await {
        return match e.output() {
            Some(output) => {
                let failure = BuildError::from_output(&plan, output);
                if let BuildError::StepFailed { detail, .. } = &failure {
                    eprintln!("{detail}");
                }
                Err(failure.into())
            }
            None => Err(e.into()),
        };
    }

    match client.inspect_image(&tag).await {
        Ok(image) => {
            for (key, value) in config.runtime.flag_vars() {
                if image.env_var(key) != Some(value) {
                    tracing::warn!(key, value, tag = %tag, "built image does not set runtime flag");
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, tag = %tag, "could not inspect built image"),
    }

    println!();
    println!("Built {tag}");
    Ok(())
}
