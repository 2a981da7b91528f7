//! Build plan, Dockerfile generation, context staging, and eject for keel.
//!
//! # Build pipeline
//!
//! ```text
//! keel build
//!   Install phase ── WORKDIR /app
//!                    RUN apt-get install <build_tools>   (skipped when empty)
//!                    COPY requirements.txt .
//!                    RUN pip install --no-cache-dir -r requirements.txt
//!   Stage phase   ── COPY . .
//!                    RUN mkdir -p data
//!   Runtime       ── ENV flags, CMD entrypoint
//! ```
//!
//! The install phase only sees the dependency manifest, so its layer keys
//! ([`BuildPlan::layers`]) stay stable while application files change.
//!
//! # Context strategy
//!
//! The staged context mirrors the git repository state:
//! - All tracked and untracked (non-ignored) files via `git ls-files`
//! - Untracked files under the data directory are runtime state and are skipped
//! - `.keel-context/`, `.keel/`, `.git/` are always excluded
//!
//! Outside a git repository the project tree is walked instead, honoring
//! `.gitignore`, and the data directory is skipped entirely.

pub mod context;
pub mod dockerfile;
pub mod eject;
pub mod layer;
pub mod plan;

pub use dockerfile::DockerfileGenerator;
pub use layer::{ContentDigest, LayerInputs, LayerKey};
pub use plan::{BuildError, BuildPlan, BuildStep, Layer, Phase, PlanError, StepKind};
