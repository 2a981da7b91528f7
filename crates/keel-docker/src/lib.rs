pub mod client;
pub mod docker;
pub mod executor;

pub use client::{
    CheckResult, DataMount, DockerClient, DoctorReport, ImageBuildError, ImageConfig, InspectError,
    RunError,
};
pub use docker::DockerError;
pub use executor::{DockerExecutor, RealExecutor};
