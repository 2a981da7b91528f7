//! Runtime stage: environment flags and entrypoint launch.
//!
//! ```text
//! keel run
//!   1. Provision ── ensure_dir(<project>/data)
//!   2. Env       ── .env file < [build].env < runtime flags
//!   3. Launch    ── exec the entrypoint in the project root
//! ```
//!
//! The launched process is not supervised: no restarts, no health checks.
//! Its exit code is keel's exit code.

pub mod env;
pub mod error;
pub mod launcher;

pub use env::{RuntimeEnv, load_env_file};
pub use error::LaunchError;
pub use launcher::{Launcher, prepare};
