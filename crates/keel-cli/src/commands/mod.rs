mod build;
mod clean;
mod doctor;
mod eject;
mod init;
mod plan;
mod run;
mod up;

use keel_core::KeelConfig;
use std::path::Path;

pub use build::build;
pub use clean::clean;
pub use doctor::doctor;
pub use eject::eject;
pub use init::init_project;
pub use plan::plan;
pub use run::run;
pub use up::up;

/// `--tag` if given, otherwise `<image name>:latest`.
pub(crate) fn resolve_tag(
    tag: Option<String>,
    config: &KeelConfig,
    project_dir: &Path,
) -> anyhow::Result<String> {
    match tag {
        Some(tag) => Ok(tag),
        None => Ok(format!("{}:latest", config.image_name(project_dir)?)),
    }
}
