//! Core types and configuration for keel.
//!
//! This crate defines the `keel.toml` schema ([`KeelConfig`]), the
//! dependency manifest model ([`DependencyManifest`]), idempotent directory
//! provisioning ([`provision::ensure_dir`]), and shared error types.

pub mod config;
pub mod error;
pub mod exit;
pub mod manifest;
pub mod provision;

pub use config::{BuildConfig, KeelConfig, ProjectConfig, RuntimeConfig};
pub use error::{Error, Result};
pub use exit::exit_code;
pub use manifest::{ConstraintOp, DependencyManifest, ManifestEntry, Requirement, VersionClause};
pub use provision::{Provisioned, ensure_dir};
