use std::path::{Path, PathBuf};
use std::process::Command;

use keel_core::{KeelConfig, Provisioned, ensure_dir, exit_code};

use crate::env::{RuntimeEnv, load_env_file};
use crate::error::LaunchError;

/// Launches the entrypoint as a single foreground process.
#[derive(Debug, Clone)]
pub struct Launcher {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    env: RuntimeEnv,
}

impl Launcher {
    pub fn new(
        entrypoint: &[String],
        workdir: impl Into<PathBuf>,
        env: RuntimeEnv,
    ) -> Result<Self, LaunchError> {
        let (program, args) = entrypoint
            .split_first()
            .ok_or(LaunchError::EmptyEntrypoint)?;
        if program.trim().is_empty() {
            return Err(LaunchError::EmptyEntrypoint);
        }

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir: workdir.into(),
            env,
        })
    }

    /// Append arguments after the configured entrypoint.
    pub fn with_args(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(extra);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn env(&self) -> &RuntimeEnv {
        &self.env
    }

    /// The fully configured command: inherited environment plus [`RuntimeEnv`],
    /// working directory set, stdio inherited.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.workdir)
            .envs(self.env.vars());
        cmd
    }

    /// Spawn the entrypoint, wait for it, and return its exit code.
    ///
    /// Ctrl-C is left to the child (it shares the terminal's process group);
    /// keel keeps waiting so the child's own exit code is what comes back.
    pub async fn run(&self) -> Result<i32, LaunchError> {
        tracing::info!(program = %self.program, args = ?self.args, "launching entrypoint");

        let mut child = tokio::process::Command::from(self.command())
            .spawn()
            .map_err(|e| LaunchError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| LaunchError::Wait {
                        program: self.program.clone(),
                        source: e,
                    })?;
                }
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        tracing::warn!(error = %e, "failed to listen for ctrl-c");
                        break child.wait().await.map_err(|e| LaunchError::Wait {
                            program: self.program.clone(),
                            source: e,
                        })?;
                    }
                    tracing::debug!("interrupt received, waiting for entrypoint to exit");
                }
            }
        };

        let code = exit_code(status);
        tracing::debug!(code, "entrypoint exited");
        Ok(code)
    }

    /// Replace the keel process with the entrypoint.
    ///
    /// Only returns if the exec itself failed.
    #[cfg(unix)]
    pub fn exec(&self) -> LaunchError {
        use std::os::unix::process::CommandExt;

        tracing::info!(program = %self.program, args = ?self.args, "exec entrypoint");
        let source = self.command().exec();
        LaunchError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

/// Prepare the runtime stage for a local project.
///
/// Provisions the data directory, loads the env file, and returns a
/// launcher rooted at `project_dir`.
pub fn prepare(project_dir: &Path, config: &KeelConfig) -> Result<Launcher, LaunchError> {
    let data_dir = project_dir.join(&config.build.data_dir);
    match ensure_dir(&data_dir)? {
        Provisioned::Created => {
            tracing::info!(path = %data_dir.display(), "created data directory");
        }
        Provisioned::AlreadyPresent => {
            tracing::debug!(path = %data_dir.display(), "data directory present");
        }
    }

    let dotenv = match &config.runtime.env_file {
        Some(file) => load_env_file(&project_dir.join(file))?,
        None => Vec::new(),
    };
    let env = RuntimeEnv::from_config(config, dotenv);

    Launcher::new(&config.runtime.entrypoint, project_dir, env)
}
