use keel_core::config::CONFIG_FILE;
use keel_core::{DependencyManifest, KeelConfig};
use keel_docker::{CheckResult, DockerClient};
use std::path::Path;

pub async fn doctor() -> anyhow::Result<()> {
    let project_dir = Path::new(".");

    let client = DockerClient::new();
    let mut report = client.doctor().await;

    match KeelConfig::load(project_dir) {
        Ok(config) => {
            report.config_file = if project_dir.join(CONFIG_FILE).exists() {
                CheckResult::ok("Found")
            } else {
                CheckResult::ok("Not found, using defaults")
            };
            report.manifest =
                match DependencyManifest::load(&project_dir.join(&config.build.manifest)) {
                    Ok(manifest) => CheckResult::ok(&format!(
                        "{} ({} requirements)",
                        config.build.manifest,
                        manifest.requirements().count()
                    )),
                    Err(e) => CheckResult::fail(&e.to_string()),
                };
            report.entrypoint = check_entrypoint(project_dir, &config.runtime.entrypoint);
        }
        Err(e) => {
            report.config_file = CheckResult::fail(&e.to_string());
            report.manifest = CheckResult::fail("skipped");
            report.entrypoint = CheckResult::fail("skipped");
        }
    }

    println!();
    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("some checks failed; see above for details");
    }

    Ok(())
}

/// Script arguments (`*.py`) must exist relative to the project root.
fn check_entrypoint(project_dir: &Path, entrypoint: &[String]) -> CheckResult {
    let missing = entrypoint
        .iter()
        .skip(1)
        .filter(|arg| arg.ends_with(".py") && !arg.starts_with('-'))
        .find(|script| !project_dir.join(script).is_file());

    match missing {
        Some(script) => CheckResult::fail(&format!("{script} not found")),
        None => CheckResult::ok(&entrypoint.join(" ")),
    }
}
