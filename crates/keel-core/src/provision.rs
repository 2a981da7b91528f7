use std::io::ErrorKind;
use std::path::Path;

/// Outcome of [`ensure_dir`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyPresent,
}

/// Create `path` (and parents) if absent.
///
/// An existing directory is left untouched, contents included, and reported
/// as [`Provisioned::AlreadyPresent`]. An existing non-directory is an error.
pub fn ensure_dir(path: &Path) -> crate::Result<Provisioned> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            tracing::debug!(path = %path.display(), "directory already present");
            return Ok(Provisioned::AlreadyPresent);
        }
        Ok(_) => return Err(crate::Error::NotADirectory(path.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(crate::Error::Provision {
                path: path.to_path_buf(),
                source: e,
            });
        }
    }

    match std::fs::create_dir_all(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "directory created");
            Ok(Provisioned::Created)
        }
        // Lost a race with another creator; still fine if it is a directory.
        Err(e) if e.kind() == ErrorKind::AlreadyExists && path.is_dir() => {
            Ok(Provisioned::AlreadyPresent)
        }
        Err(e) => Err(crate::Error::Provision {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
