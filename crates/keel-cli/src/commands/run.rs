use keel_core::KeelConfig;
use keel_runtime::Launcher;
use std::path::PathBuf;

/// Run the entrypoint in the project directory with the runtime environment.
///
/// By default keel execs into the entrypoint so the program owns the process
/// and its signals. With `no_exec` it spawns, waits, and returns the exit code.
pub async fn run(no_exec: bool, args: Vec<String>) -> anyhow::Result<i32> {
    let project_dir = PathBuf::from(".");
    let config = KeelConfig::load(&project_dir)?;
    let launcher = keel_runtime::prepare(&project_dir, &config)?.with_args(args);

    if no_exec {
        return Ok(launcher.run().await?);
    }
    replace_process(&launcher).await
}

#[cfg(unix)]
async fn replace_process(launcher: &Launcher) -> anyhow::Result<i32> {
    Err(launcher.exec().into())
}

#[cfg(not(unix))]
async fn replace_process(launcher: &Launcher) -> anyhow::Result<i32> {
    Ok(launcher.run().await?)
}
