use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config value for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("failed to resolve project directory {path}")]
    ProjectDirResolve {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Dependency manifest ──
    #[error("dependency manifest not found at {0}")]
    ManifestMissing(PathBuf),

    #[error("failed to read dependency manifest {path}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}:{line}: {reason}")]
    ManifestParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("{path}:{line}: package '{name}' is already declared on line {first_line}")]
    DuplicateRequirement {
        path: PathBuf,
        name: String,
        line: usize,
        first_line: usize,
    },

    // ── Provisioning ──
    #[error("failed to provision directory {path}")]
    Provision {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0} exists but is not a directory")]
    NotADirectory(PathBuf),
}
