use std::fmt;

use keel_core::BuildConfig;
use sha2::{Digest, Sha256};

use crate::layer::{LayerInputs, LayerKey};

/// Build phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Toolchain and dependencies; depends only on the manifest.
    Install,
    /// Application files and data directory.
    Stage,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Stage => "stage",
        })
    }
}

/// Step identity. Declaration order is the required execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StepKind {
    Workdir,
    InstallTools,
    CopyManifest,
    InstallDependencies,
    CopyApplication,
    ProvisionDataDir,
}

impl StepKind {
    pub fn phase(self) -> Phase {
        match self {
            Self::Workdir | Self::InstallTools | Self::CopyManifest | Self::InstallDependencies => {
                Phase::Install
            }
            Self::CopyApplication | Self::ProvisionDataDir => Phase::Stage,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Workdir => "set working root",
            Self::InstallTools => "install build tools",
            Self::CopyManifest => "copy dependency manifest",
            Self::InstallDependencies => "install dependencies",
            Self::CopyApplication => "copy application files",
            Self::ProvisionDataDir => "provision data directory",
        }
    }

    fn is_optional(self) -> bool {
        matches!(self, Self::InstallTools)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const ALL_STEPS: [StepKind; 6] = [
    StepKind::Workdir,
    StepKind::InstallTools,
    StepKind::CopyManifest,
    StepKind::InstallDependencies,
    StepKind::CopyApplication,
    StepKind::ProvisionDataDir,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStep {
    Workdir { path: String },
    InstallTools { packages: Vec<String> },
    CopyManifest { manifest: String },
    InstallDependencies { manifest: String },
    CopyApplication,
    ProvisionDataDir { path: String },
}

impl BuildStep {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Workdir { .. } => StepKind::Workdir,
            Self::InstallTools { .. } => StepKind::InstallTools,
            Self::CopyManifest { .. } => StepKind::CopyManifest,
            Self::InstallDependencies { .. } => StepKind::InstallDependencies,
            Self::CopyApplication => StepKind::CopyApplication,
            Self::ProvisionDataDir { .. } => StepKind::ProvisionDataDir,
        }
    }

    pub fn phase(&self) -> Phase {
        self.kind().phase()
    }

    /// The Dockerfile instruction for this step.
    pub fn instruction(&self) -> String {
        match self {
            Self::Workdir { path } => format!("WORKDIR {path}"),
            Self::InstallTools { packages } => format!(
                "RUN apt-get update \\\n    && apt-get install -y --no-install-recommends {} \\\n    && rm -rf /var/lib/apt/lists/*",
                packages.join(" ")
            ),
            Self::CopyManifest { manifest } => {
                if manifest.contains('/') {
                    format!("COPY {manifest} {manifest}")
                } else {
                    format!("COPY {manifest} .")
                }
            }
            Self::InstallDependencies { manifest } => {
                format!("RUN pip install --no-cache-dir -r {manifest}")
            }
            Self::CopyApplication => "COPY . .".to_owned(),
            Self::ProvisionDataDir { path } => format!("RUN mkdir -p {path}"),
        }
    }

    /// Fragment that identifies this step's command in docker's failure output.
    fn command_signature(&self) -> Option<&'static str> {
        match self {
            Self::InstallTools { .. } => Some("apt-get"),
            Self::InstallDependencies { .. } => Some("pip install"),
            Self::ProvisionDataDir { .. } => Some("mkdir -p"),
            _ => None,
        }
    }
}

/// One step of a plan together with its cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub kind: StepKind,
    pub phase: Phase,
    pub instruction: String,
    pub key: LayerKey,
}

/// An ordered, validated build plan.
///
/// Every install-phase step precedes every stage-phase step, so a change
/// confined to application files never invalidates the dependency layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    base_image: String,
    steps: Vec<BuildStep>,
}

impl BuildPlan {
    /// Validate `steps` against the required order.
    pub fn new(base_image: impl Into<String>, steps: Vec<BuildStep>) -> Result<Self, PlanError> {
        let mut previous: Option<StepKind> = None;
        for step in &steps {
            let kind = step.kind();
            if let Some(prev) = previous {
                if kind == prev {
                    return Err(PlanError::DuplicateStep(kind));
                }
                if kind < prev {
                    return Err(PlanError::OutOfOrder {
                        step: kind,
                        after: prev,
                    });
                }
            }
            previous = Some(kind);
        }

        for required in ALL_STEPS.iter().filter(|k| !k.is_optional()) {
            if !steps.iter().any(|s| s.kind() == *required) {
                return Err(PlanError::MissingStep(*required));
            }
        }

        Ok(Self {
            base_image: base_image.into(),
            steps,
        })
    }

    /// The canonical plan for a build config.
    pub fn from_config(config: &BuildConfig) -> Result<Self, PlanError> {
        let mut steps = vec![BuildStep::Workdir {
            path: config.workdir.clone(),
        }];
        if config.build_tools.is_empty() {
            tracing::debug!("no build tools configured, skipping toolchain layer");
        } else {
            steps.push(BuildStep::InstallTools {
                packages: config.build_tools.clone(),
            });
        }
        steps.extend([
            BuildStep::CopyManifest {
                manifest: config.manifest.clone(),
            },
            BuildStep::InstallDependencies {
                manifest: config.manifest.clone(),
            },
            BuildStep::CopyApplication,
            BuildStep::ProvisionDataDir {
                path: config.data_dir.clone(),
            },
        ]);

        Self::new(config.base_image.clone(), steps)
    }

    pub fn base_image(&self) -> &str {
        &self.base_image
    }

    pub fn steps(&self) -> &[BuildStep] {
        &self.steps
    }

    pub fn phase_steps(&self, phase: Phase) -> impl Iterator<Item = &BuildStep> {
        self.steps.iter().filter(move |s| s.phase() == phase)
    }

    pub fn contains(&self, kind: StepKind) -> bool {
        self.steps.iter().any(|s| s.kind() == kind)
    }

    /// Chained cache keys, one per step.
    ///
    /// Each key covers its parent key and the step's instruction; copy steps
    /// also cover the digest of what they copy. Install-phase keys therefore
    /// depend only on the base image, the tools, and the manifest.
    pub fn layers(&self, inputs: &LayerInputs) -> Vec<Layer> {
        let mut root = Sha256::new();
        root.update(b"FROM\0");
        root.update(self.base_image.as_bytes());
        let mut parent = LayerKey::from_hasher(root);

        self.steps
            .iter()
            .map(|step| {
                let instruction = step.instruction();
                let mut hasher = Sha256::new();
                hasher.update(parent.as_str().as_bytes());
                hasher.update(b"\0");
                hasher.update(instruction.as_bytes());
                match step {
                    BuildStep::CopyManifest { .. } => hasher.update(inputs.manifest.as_bytes()),
                    BuildStep::CopyApplication => hasher.update(inputs.application.as_bytes()),
                    _ => {}
                }
                let key = LayerKey::from_hasher(hasher);
                parent = key.clone();

                Layer {
                    kind: step.kind(),
                    phase: step.phase(),
                    instruction,
                    key,
                }
            })
            .collect()
    }

    /// Map docker build output back to the step that failed.
    pub fn failed_step(&self, output: &str) -> Option<StepKind> {
        if let Some(command) = output.lines().find_map(failed_command) {
            return self
                .steps
                .iter()
                .find(|s| s.command_signature().is_some_and(|sig| command.contains(sig)))
                .map(BuildStep::kind);
        }

        let copy_failed = output.contains("failed to compute cache key")
            || output.contains("failed to calculate checksum")
            || output.contains("COPY failed");
        if !copy_failed {
            return None;
        }

        let manifest = self.steps.iter().find_map(|s| match s {
            BuildStep::CopyManifest { manifest } => Some(manifest.as_str()),
            _ => None,
        });
        match manifest {
            Some(m) if output.contains(m) => Some(StepKind::CopyManifest),
            _ => Some(StepKind::CopyApplication),
        }
    }
}

/// Extract the shell command from a failed RUN line (BuildKit or legacy builder).
fn failed_command(line: &str) -> Option<&str> {
    if let Some(start) = line.find("process \"") {
        let rest = &line[start + "process \"".len()..];
        let end = rest.find("\" did not complete successfully")?;
        return Some(&rest[..end]);
    }
    if let Some(start) = line.find("The command '") {
        let rest = &line[start + "The command '".len()..];
        let end = rest.find("' returned a non-zero code")?;
        return Some(&rest[..end]);
    }
    None
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("step '{step}' must not run after '{after}'")]
    OutOfOrder { step: StepKind, after: StepKind },

    #[error("step '{0}' appears more than once")]
    DuplicateStep(StepKind),

    #[error("build plan is missing required step '{0}'")]
    MissingStep(StepKind),
}

/// A failed image build, attributed to a plan step where possible.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build failed at step '{step}' ({phase} phase)")]
    StepFailed {
        step: StepKind,
        phase: Phase,
        detail: String,
    },

    #[error("image build failed: {detail}")]
    Docker { detail: String },
}

impl BuildError {
    /// Classify builder output against `plan`.
    pub fn from_output(plan: &BuildPlan, output: &str) -> Self {
        let detail = output
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .to_owned();

        match plan.failed_step(output) {
            Some(step) => Self::StepFailed {
                step,
                phase: step.phase(),
                detail,
            },
            None => Self::Docker { detail },
        }
    }

    pub fn step(&self) -> Option<StepKind> {
        match self {
            Self::StepFailed { step, .. } => Some(*step),
            Self::Docker { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_buildkit_command() {
        let line = r#"ERROR: failed to solve: process "/bin/sh -c pip install --no-cache-dir -r requirements.txt" did not complete successfully: exit code: 1"#;
        assert_eq!(
            failed_command(line),
            Some("/bin/sh -c pip install --no-cache-dir -r requirements.txt")
        );
    }

    #[test]
    fn extracts_legacy_builder_command() {
        let line = "The command '/bin/sh -c mkdir -p data' returned a non-zero code: 1";
        assert_eq!(failed_command(line), Some("/bin/sh -c mkdir -p data"));
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert_eq!(failed_command("#5 [2/6] WORKDIR /app"), None);
    }
}
