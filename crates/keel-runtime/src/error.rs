use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("entrypoint is empty; set [runtime].entrypoint in keel.toml")]
    EmptyEntrypoint,

    #[error("failed to read env file {path}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },

    #[error(transparent)]
    Provision(#[from] keel_core::Error),

    #[error("failed to start entrypoint '{program}'")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed waiting for entrypoint '{program}'")]
    Wait {
        program: String,
        source: std::io::Error,
    },
}
