use std::collections::VecDeque;
use std::process::Stdio;

use keel_core::exit_code;

use crate::docker::DockerError;

/// Lines of stderr kept from a streamed command for error reporting.
const STDERR_TAIL_LINES: usize = 200;

/// Abstraction over docker CLI execution for testability.
///
/// Production code uses [`RealExecutor`], tests use mockall-generated mocks.
#[allow(async_fn_in_trait)]
pub trait DockerExecutor: Send + Sync {
    /// Execute a docker command and capture stdout.
    async fn exec(&self, args: &[String]) -> Result<String, DockerError>;

    /// Execute a docker command, streaming output to the terminal.
    /// On failure the tail of stderr is returned in the error.
    async fn exec_streaming(&self, args: &[String]) -> Result<(), DockerError>;

    /// Execute a docker command attached to the terminal and return its exit code.
    async fn exec_status(&self, args: &[String]) -> Result<i32, DockerError>;
}

/// Real docker CLI executor.
pub struct RealExecutor {
    program: String,
}

impl RealExecutor {
    pub fn new() -> Self {
        Self {
            program: "docker".to_owned(),
        }
    }

    /// Use a docker-compatible CLI such as `podman`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for RealExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerExecutor for RealExecutor {
    async fn exec(&self, args: &[String]) -> Result<String, DockerError> {
        tracing::debug!(program = %self.program, ?args, "exec");

        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DockerError::NotFound { source: e })?;

        if output.status.success() {
            String::from_utf8(output.stdout).map_err(|e| DockerError::InvalidUtf8 { source: e })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(DockerError::CommandFailed {
                args: args.to_vec(),
                stderr,
            })
        }
    }

    async fn exec_streaming(&self, args: &[String]) -> Result<(), DockerError> {
        use tokio::io::{AsyncBufReadExt, BufReader};

        tracing::debug!(program = %self.program, ?args, "exec streaming");

        let mut child = tokio::process::Command::new(&self.program)
            .args(args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DockerError::NotFound { source: e })?;

        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| DockerError::Io { source: e })?
            {
                eprintln!("{line}");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DockerError::Io { source: e })?;

        if status.success() {
            Ok(())
        } else {
            let mut stderr = Vec::from(tail).join("\n");
            if stderr.is_empty() {
                stderr = format!("exit code: {status}");
            }
            Err(DockerError::CommandFailed {
                args: args.to_vec(),
                stderr,
            })
        }
    }

    async fn exec_status(&self, args: &[String]) -> Result<i32, DockerError> {
        tracing::debug!(program = %self.program, ?args, "exec attached");

        let mut child = tokio::process::Command::new(&self.program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| DockerError::NotFound { source: e })?;

        // Ctrl-C reaches the attached CLI through the terminal's process
        // group; keel keeps waiting so the container's exit code comes back.
        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| DockerError::Io { source: e })?;
                }
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        tracing::warn!(error = %e, "failed to listen for ctrl-c");
                        break child.wait().await.map_err(|e| DockerError::Io { source: e })?;
                    }
                    tracing::debug!("interrupt received, waiting for docker to exit");
                }
            }
        };

        Ok(exit_code(status))
    }
}
