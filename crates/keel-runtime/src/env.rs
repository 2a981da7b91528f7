use std::collections::BTreeMap;
use std::path::Path;

use keel_core::KeelConfig;

use crate::error::LaunchError;

/// Environment handed to the entrypoint, fixed before launch.
///
/// Layered lowest to highest: dotenv values, `[build].env`, runtime flags.
/// Nothing can unset a flag the config turned on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeEnv {
    vars: BTreeMap<String, String>,
}

impl RuntimeEnv {
    pub fn from_config(config: &KeelConfig, dotenv: Vec<(String, String)>) -> Self {
        let mut vars: BTreeMap<String, String> = dotenv.into_iter().collect();
        vars.extend(
            config
                .build
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        vars.extend(
            config
                .runtime
                .flag_vars()
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned())),
        );
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Reads a dotenv file. A missing file yields no variables.
///
/// Keys already present in keel's own environment are skipped, so values
/// passed in by the container or shell win over the file.
pub fn load_env_file(path: &Path) -> Result<Vec<(String, String)>, LaunchError> {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        // arch-lint: allow(no-error-swallowing) reason="the env file is optional"
        Err(e) if e.not_found() => {
            tracing::debug!(path = %path.display(), "no env file");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(LaunchError::EnvFile {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let mut vars = Vec::new();
    for item in iter {
        let (key, value) = item.map_err(|e| LaunchError::EnvFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        if std::env::var_os(&key).is_some() {
            tracing::debug!(key, "env file value shadowed by process environment");
            continue;
        }
        vars.push((key, value));
    }

    tracing::debug!(path = %path.display(), count = vars.len(), "loaded env file");
    Ok(vars)
}
