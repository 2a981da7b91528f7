use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::docker::DockerError;
use crate::executor::{DockerExecutor, RealExecutor};

/// `docker run` exit code when the daemon could not start the container.
const DOCKER_RUN_FAILURE: i32 = 125;

/// Docker operations client, parameterized over the executor for testability.
pub struct DockerClient<E: DockerExecutor = RealExecutor> {
    executor: E,
}

impl DockerClient<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor::new(),
        }
    }
}

impl Default for DockerClient<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DockerExecutor> DockerClient<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    // ── Doctor ──

    /// Run the docker checks without early return.
    /// Project-level checks are left for the caller to fill in.
    pub async fn doctor(&self) -> DoctorReport {
        let mut report = DoctorReport::default();

        match self
            .executor
            .exec(&args(["version", "--format", "{{.Client.Version}}"]))
            .await
        {
            Ok(v) => report.docker = CheckResult::ok(v.trim()),
            Err(DockerError::NotFound { .. }) => {
                report.docker = CheckResult::fail("docker CLI not found");
                report.daemon = CheckResult::fail("skipped");
                return report;
            }
            // The client prints its version even when the daemon is down.
            Err(e) => report.docker = CheckResult::fail(&e.to_string()),
        }

        match self
            .executor
            .exec(&args(["info", "--format", "{{.ServerVersion}}"]))
            .await
        {
            Ok(v) if !v.trim().is_empty() => report.daemon = CheckResult::ok(v.trim()),
            // arch-lint: allow(no-error-swallowing) reason="an empty version and a failed info call both mean the daemon is unusable"
            _ => report.daemon = CheckResult::fail("daemon not reachable"),
        }

        report
    }

    // ── Images ──

    /// Build and tag an image from a staged context directory.
    ///
    /// Builder output is streamed to the terminal. The image is only tagged
    /// when every step succeeds.
    pub async fn build_image(
        &self,
        context_dir: &Path,
        tag: &str,
        no_cache: bool,
    ) -> Result<(), ImageBuildError> {
        let context_str = context_dir
            .to_str()
            .ok_or_else(|| ImageBuildError::InvalidPath(context_dir.to_path_buf()))?;
        let dockerfile = context_dir.join("Dockerfile");
        let dockerfile_str = dockerfile
            .to_str()
            .ok_or_else(|| ImageBuildError::InvalidPath(dockerfile.clone()))?;

        let mut cmd = args(["build", "--tag", tag, "--file", dockerfile_str]);
        if no_cache {
            cmd.push("--no-cache".to_owned());
        }
        cmd.push(context_str.to_owned());

        tracing::info!(tag, context = %context_dir.display(), "building image");
        self.executor
            .exec_streaming(&cmd)
            .await
            .map_err(|e| ImageBuildError::Build { source: e })
    }

    pub async fn inspect_image(&self, tag: &str) -> Result<ImageConfig, InspectError> {
        let output = self
            .executor
            .exec(&args(["image", "inspect", "--format", "{{json .Config}}", tag]))
            .await
            .map_err(|e| InspectError::Inspect { source: e })?;

        serde_json::from_str(output.trim()).map_err(|e| InspectError::Parse { source: e })
    }

    pub async fn image_exists(&self, tag: &str) -> bool {
        self.executor
            .exec(&args(["image", "inspect", "--format", "{{.Id}}", tag]))
            .await
            // arch-lint: allow(no-silent-result-drop) reason="inspect fails exactly when the image is absent"
            .is_ok()
    }

    pub async fn remove_image(&self, tag: &str) -> Result<(), DockerError> {
        self.executor
            .exec(&args(["image", "rm", tag]))
            .await
            .map(|_| ())
    }

    // ── Containers ──

    /// Run the image in the foreground and return the container's exit code.
    ///
    /// The container is removed on exit. Without a mount, the data directory
    /// is the one baked into the image and does not outlive the container.
    pub async fn run_container(
        &self,
        tag: &str,
        data: Option<&DataMount>,
    ) -> Result<i32, RunError> {
        let mut cmd = args(["run", "--rm"]);
        if let Some(mount) = data {
            let host = mount
                .host
                .to_str()
                .ok_or_else(|| RunError::InvalidPath(mount.host.clone()))?;
            cmd.push("--volume".to_owned());
            cmd.push(format!("{host}:{}", mount.container));
        }
        cmd.push(tag.to_owned());

        tracing::info!(tag, "starting container");
        let code = self
            .executor
            .exec_status(&cmd)
            .await
            .map_err(|e| RunError::Run { source: e })?;

        if code == DOCKER_RUN_FAILURE {
            tracing::warn!(tag, "docker could not start the container");
        }
        Ok(code)
    }
}

// ── Helper ──

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

// ── Types ──

/// Host directory mounted over the image's data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMount {
    pub host: PathBuf,
    pub container: String,
}

/// Subset of `docker image inspect` `.Config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    #[serde(default)]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
}

impl ImageConfig {
    /// Value of `key` in the image's baked environment.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.as_deref()?.iter().find_map(|entry| {
            let (k, v) = entry.split_once('=')?;
            (k == key).then_some(v)
        })
    }
}

#[derive(Debug, Default)]
pub struct DoctorReport {
    pub docker: CheckResult,
    pub daemon: CheckResult,
    pub config_file: CheckResult,
    pub manifest: CheckResult,
    pub entrypoint: CheckResult,
}

impl DoctorReport {
    pub fn all_passed(&self) -> bool {
        self.docker.passed
            && self.daemon.passed
            && self.config_file.passed
            && self.manifest.passed
            && self.entrypoint.passed
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("Docker CLI", &self.docker),
            ("Docker daemon", &self.daemon),
            ("keel.toml", &self.config_file),
            ("Manifest", &self.manifest),
            ("Entrypoint", &self.entrypoint),
        ];
        for (label, check) in rows {
            writeln!(f, "  [{}] {label:<14} {}", check.icon(), check.detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            detail: detail.to_owned(),
        }
    }

    pub fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            detail: detail.to_owned(),
        }
    }

    pub fn icon(&self) -> &'static str {
        if self.passed { "OK" } else { "NG" }
    }
}

// ── Error types ──

#[derive(Debug, thiserror::Error)]
pub enum ImageBuildError {
    #[error("path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),

    #[error("docker build failed")]
    Build { source: DockerError },
}

impl ImageBuildError {
    /// Builder output captured from the failed build, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Build { source } => source.stderr(),
            Self::InvalidPath(_) => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("image inspect failed")]
    Inspect { source: DockerError },

    #[error("unexpected image inspect output")]
    Parse { source: serde_json::Error },
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),

    #[error("docker run failed")]
    Run { source: DockerError },
}
