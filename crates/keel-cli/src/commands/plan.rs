use std::path::{Path, PathBuf};

use keel_build::context::application_files;
use keel_build::{BuildPlan, Layer, LayerInputs, Phase};
use keel_core::{DependencyManifest, KeelConfig};
use serde::Serialize;

#[derive(Serialize)]
struct PlanOutput<'a> {
    base_image: &'a str,
    layers: Vec<LayerRow<'a>>,
}

#[derive(Serialize)]
struct LayerRow<'a> {
    phase: String,
    step: &'static str,
    instruction: &'a str,
    key: &'a str,
}

/// Print the build plan with the cache key each layer would get.
pub async fn plan(json: bool) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = KeelConfig::load(&project_dir)?;
    let manifest = DependencyManifest::load(&project_dir.join(&config.build.manifest))?;
    let plan = BuildPlan::from_config(&config.build)?;

    let files = application_files(&project_dir, &config.build.data_dir)?;
    let inputs = LayerInputs::from_project(&project_dir, Path::new(&config.build.manifest), &files)?;
    let layers = plan.layers(&inputs);

    if json {
        let output = PlanOutput {
            base_image: plan.base_image(),
            layers: layers
                .iter()
                .map(|l| LayerRow {
                    phase: l.phase.to_string(),
                    step: l.kind.label(),
                    instruction: &l.instruction,
                    key: l.key.as_str(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Base image: {}", plan.base_image());
    println!(
        "Manifest:   {} ({} requirements)",
        config.build.manifest,
        manifest.requirements().count()
    );
    println!("Files:      {}", files.len());
    for phase in [Phase::Install, Phase::Stage] {
        println!();
        println!("{phase} phase");
        for layer in layers.iter().filter(|l| l.phase == phase) {
            print_layer(layer);
        }
    }

    Ok(())
}

fn print_layer(layer: &Layer) {
    println!(
        "  {:<26} {}  {}",
        layer.kind.label(),
        layer.key.short(),
        layer.instruction
    );
}
