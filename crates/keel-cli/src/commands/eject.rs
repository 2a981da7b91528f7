use keel_build::{BuildPlan, DockerfileGenerator};
use keel_core::KeelConfig;
use std::path::PathBuf;

pub async fn eject() -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = KeelConfig::load(&project_dir)?;
    let plan = BuildPlan::from_config(&config.build)?;

    let dockerfile = DockerfileGenerator::new(&config, &plan).render();

    keel_build::eject::eject(&project_dir, &dockerfile)?;

    println!("Ejected build config to .keel/Dockerfile");
    println!("You can now edit it directly. keel build will use this file.");
    Ok(())
}
