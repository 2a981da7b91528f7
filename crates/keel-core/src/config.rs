use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// Variable that makes the language runtime flush stdout/stderr immediately.
pub const UNBUFFERED_VAR: &str = "PYTHONUNBUFFERED";
/// Variable that stops the language runtime from writing bytecode caches.
pub const NO_BYTECODE_VAR: &str = "PYTHONDONTWRITEBYTECODE";

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE: &str = "keel.toml";

/// keel.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeelConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Image name (defaults to the project directory name)
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Base execution environment image
    #[serde(default = "default_base_image")]
    pub base_image: String,
    /// System packages needed to compile native extensions.
    /// An empty list skips the toolchain layer entirely.
    #[serde(default = "default_build_tools")]
    pub build_tools: Vec<String>,
    /// Dependency manifest, relative to the project root
    #[serde(default = "default_manifest")]
    pub manifest: String,
    /// Fixed working root inside the image
    #[serde(default = "default_workdir")]
    pub workdir: String,
    /// Data directory, relative to `workdir`
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Static environment variables baked into the image as ENV lines.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Entrypoint command, exec form
    #[serde(default = "default_entrypoint")]
    pub entrypoint: Vec<String>,
    /// Set the unbuffered-output flag
    #[serde(default = "default_true")]
    pub unbuffered: bool,
    /// Set the no-bytecode-cache flag
    #[serde(default = "default_true")]
    pub no_bytecode: bool,
    /// Optional dotenv file loaded by `keel run`, relative to the project root
    #[serde(default = "default_env_file")]
    pub env_file: Option<String>,
    /// Port documented with EXPOSE
    #[serde(default)]
    pub port: Option<u16>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            base_image: default_base_image(),
            build_tools: default_build_tools(),
            manifest: default_manifest(),
            workdir: default_workdir(),
            data_dir: default_data_dir(),
            env: BTreeMap::new(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            entrypoint: default_entrypoint(),
            unbuffered: true,
            no_bytecode: true,
            env_file: default_env_file(),
            port: None,
        }
    }
}

impl KeelConfig {
    /// Load from keel.toml at the given path, or return defaults if not found.
    pub fn load(project_dir: &Path) -> crate::Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        let config = if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path,
                source: e,
            })?
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would produce a broken or unsafe build recipe.
    pub fn validate(&self) -> crate::Result<()> {
        let build = &self.build;

        if build.base_image.trim().is_empty() {
            return Err(invalid("build.base_image", "must not be empty"));
        }
        for tool in &build.build_tools {
            if !is_package_name(tool) {
                return Err(invalid(
                    "build.build_tools",
                    format!("'{tool}' is not a valid system package name"),
                ));
            }
        }
        check_relative("build.manifest", &build.manifest)?;
        check_relative("build.data_dir", &build.data_dir)?;
        if !build.workdir.starts_with('/') || build.workdir.contains(char::is_whitespace) {
            return Err(invalid(
                "build.workdir",
                "must be an absolute path without whitespace",
            ));
        }
        for (key, value) in &build.env {
            if !is_env_key(key) {
                return Err(invalid(
                    "build.env",
                    format!("'{key}' is not a valid environment variable name"),
                ));
            }
            if value.chars().any(char::is_control) {
                return Err(invalid(
                    "build.env",
                    format!("value of '{key}' must be a single line without control characters"),
                ));
            }
        }

        if self.runtime.entrypoint.is_empty() || self.runtime.entrypoint[0].trim().is_empty() {
            return Err(invalid("runtime.entrypoint", "must name a program to run"));
        }

        if matches!(&self.project.name, Some(name) if name.trim().is_empty()) {
            return Err(invalid("project.name", "must not be empty"));
        }

        Ok(())
    }

    /// Image name: `[project].name`, or the project directory name.
    /// Lowercased and restricted to characters docker accepts in a repository name.
    pub fn image_name(&self, project_dir: &Path) -> crate::Result<String> {
        let raw = match &self.project.name {
            Some(name) => name.clone(),
            None => {
                let resolved = project_dir.canonicalize().map_err(|e| {
                    crate::Error::ProjectDirResolve {
                        path: project_dir.to_path_buf(),
                        source: e,
                    }
                })?;
                resolved
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "app".to_owned())
            }
        };

        let name: String = raw
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let name = name.trim_matches(|c| matches!(c, '.' | '_' | '-'));

        if name.is_empty() {
            Ok("app".to_owned())
        } else {
            Ok(name.to_owned())
        }
    }

    /// Data directory as seen inside the image, e.g. `/app/data`.
    pub fn container_data_dir(&self) -> String {
        format!(
            "{}/{}",
            self.build.workdir.trim_end_matches('/'),
            self.build.data_dir.trim_matches('/')
        )
    }
}

impl RuntimeConfig {
    /// The process-wide flags this config turns on, in a fixed order.
    pub fn flag_vars(&self) -> Vec<(&'static str, &'static str)> {
        let mut vars = Vec::with_capacity(2);
        if self.unbuffered {
            vars.push((UNBUFFERED_VAR, "1"));
        }
        if self.no_bytecode {
            vars.push((NO_BYTECODE_VAR, "1"));
        }
        vars
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> crate::Error {
    crate::Error::InvalidConfig {
        field,
        reason: reason.into(),
    }
}

fn check_relative(field: &'static str, value: &str) -> crate::Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    if value.contains(char::is_whitespace) {
        return Err(invalid(field, "must not contain whitespace"));
    }
    let path = Path::new(value);
    if path.is_absolute() {
        return Err(invalid(field, "must be a relative path"));
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(invalid(field, "must not escape the project root"));
    }
    if !path.components().any(|c| matches!(c, Component::Normal(_))) {
        return Err(invalid(field, "must name a path inside the project root"));
    }
    Ok(())
}

/// Debian package names: lowercase alphanumerics plus `+ - .`, starting alphanumeric.
fn is_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_base_image() -> String {
    "python:3.11-slim".to_owned()
}

fn default_build_tools() -> Vec<String> {
    vec!["gcc".to_owned()]
}

fn default_manifest() -> String {
    "requirements.txt".to_owned()
}

fn default_workdir() -> String {
    "/app".to_owned()
}

fn default_data_dir() -> String {
    "data".to_owned()
}

fn default_entrypoint() -> Vec<String> {
    vec!["python".to_owned(), "main.py".to_owned()]
}

fn default_env_file() -> Option<String> {
    Some(".env".to_owned())
}

fn default_true() -> bool {
    true
}
