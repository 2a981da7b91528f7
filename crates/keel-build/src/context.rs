use std::path::{Component, Path, PathBuf};
use std::process::Command;

/// Directory the build context is staged into, relative to the project root.
pub const CONTEXT_DIR: &str = ".keel-context";

/// Files/directories that keel always excludes from the context,
/// regardless of .gitignore content.
const KEEL_EXCLUDES: &[&str] = &[CONTEXT_DIR, ".keel", ".git"];

/// Lists the application file set, relative to `project_dir`, sorted.
///
/// Inside a git work tree this is every tracked file plus untracked files
/// that are not ignored, minus untracked files under `data_dir` (state left
/// behind by a local run). Elsewhere the tree is walked with `.gitignore`
/// rules applied and `data_dir` skipped.
pub fn application_files(project_dir: &Path, data_dir: &str) -> Result<Vec<PathBuf>, ContextError> {
    // `./data` and `data` name the same directory; listed paths never carry `./`.
    let data_dir: PathBuf = Path::new(data_dir)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    let mut files = if is_git_work_tree(project_dir) {
        let all = git_ls_files(project_dir, &["--cached", "--others", "--exclude-standard"])?;
        let pathspec = data_dir.to_string_lossy();
        let state = git_ls_files(
            project_dir,
            &["--others", "--exclude-standard", "--", pathspec.as_ref()],
        )?;
        if !state.is_empty() {
            tracing::debug!(count = state.len(), "skipping untracked files under data dir");
        }
        all.into_iter().filter(|f| !state.contains(f)).collect()
    } else {
        tracing::debug!(dir = %project_dir.display(), "not a git work tree, walking directory");
        walk_files(project_dir, &data_dir)?
    };

    files.retain(|relative| {
        !KEEL_EXCLUDES
            .iter()
            .any(|ex| relative.starts_with(ex))
    });
    files.sort();
    files.dedup();
    Ok(files)
}

/// Stages `files` and the generated Dockerfile into `.keel-context/`.
///
/// The previous context is removed first so nothing from an earlier build
/// leaks into this one. The dependency manifest must be part of `files`.
pub fn create_context(
    project_dir: &Path,
    files: &[PathBuf],
    manifest: &str,
    dockerfile_content: &str,
) -> Result<PathBuf, ContextError> {
    let manifest_path = Path::new(manifest);
    if !files.iter().any(|f| f == manifest_path) {
        return Err(ContextError::MissingManifest(project_dir.join(manifest)));
    }

    let context_dir = project_dir.join(CONTEXT_DIR);

    // Clean previous context
    if context_dir.exists() {
        std::fs::remove_dir_all(&context_dir).map_err(|e| ContextError::Cleanup {
            path: context_dir.clone(),
            source: e,
        })?;
    }
    std::fs::create_dir_all(&context_dir).map_err(|e| ContextError::Create {
        path: context_dir.clone(),
        source: e,
    })?;

    for relative_path in files {
        let src = project_dir.join(relative_path);
        let dst = context_dir.join(relative_path);

        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ContextError::Create {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::copy(&src, &dst).map_err(|e| ContextError::CopyFile {
            path: src,
            source: e,
        })?;
    }

    let dockerfile_path = context_dir.join("Dockerfile");
    std::fs::write(&dockerfile_path, dockerfile_content).map_err(|e| {
        ContextError::WriteDockerfile {
            path: dockerfile_path.clone(),
            source: e,
        }
    })?;

    tracing::info!(
        files = files.len(),
        dir = %context_dir.display(),
        "build context staged"
    );

    Ok(context_dir)
}

/// Removes the staged context. Returns `false` when there was none.
pub fn remove_context(project_dir: &Path) -> Result<bool, ContextError> {
    let context_dir = project_dir.join(CONTEXT_DIR);
    if !context_dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(&context_dir).map_err(|e| ContextError::Cleanup {
        path: context_dir,
        source: e,
    })?;
    Ok(true)
}

fn is_git_work_tree(project_dir: &Path) -> bool {
    match Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(project_dir)
        .output()
    {
        Ok(output) => output.status.success() && output.stdout.starts_with(b"true"),
        Err(e) => {
            tracing::debug!(error = %e, "git unavailable");
            false
        }
    }
}

/// Runs `git ls-files -z` with the given selection flags.
///
/// NUL-separated output is never C-quoted, so non-ASCII names come back as-is.
fn git_ls_files(project_dir: &Path, selection: &[&str]) -> Result<Vec<PathBuf>, ContextError> {
    let output = Command::new("git")
        .args(["ls-files", "-z"])
        .args(selection)
        .current_dir(project_dir)
        .output()
        .map_err(|e| ContextError::GitCommand {
            detail: "failed to execute git ls-files".to_owned(),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ContextError::GitFailed {
            detail: format!(
                "git ls-files exited with {}: {}",
                output.status,
                stderr.trim()
            ),
        });
    }

    Ok(output
        .stdout
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .map(path_from_bytes)
        .collect())
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

fn walk_files(project_dir: &Path, data_dir: &Path) -> Result<Vec<PathBuf>, ContextError> {
    let mut files = Vec::new();
    let walker = ignore::WalkBuilder::new(project_dir)
        .hidden(false)
        .require_git(false)
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| ContextError::Walk {
            path: project_dir.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(project_dir) else {
            continue;
        };
        if relative.starts_with(".git") || relative.starts_with(data_dir) {
            continue;
        }
        files.push(relative.to_path_buf());
    }

    Ok(files)
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("dependency manifest {0} is not part of the application file set")]
    MissingManifest(PathBuf),
    #[error("failed to clean up context directory {path}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create directory {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to copy file {path}")]
    CopyFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write Dockerfile at {path}")]
    WriteDockerfile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to walk {path}")]
    Walk {
        path: PathBuf,
        source: ignore::Error,
    },
    #[error("git command failed: {detail}")]
    GitCommand {
        detail: String,
        source: std::io::Error,
    },
    #[error("git failed: {detail}")]
    GitFailed { detail: String },
}
