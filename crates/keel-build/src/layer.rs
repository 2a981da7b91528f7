use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// SHA-256 of some content, used as an input to layer keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Digest of a file set, independent of iteration order.
    pub fn of_file_set<'a, I>(files: I) -> Self
    where
        I: IntoIterator<Item = (&'a Path, &'a [u8])>,
    {
        let sorted: BTreeMap<&Path, ContentDigest> = files
            .into_iter()
            .map(|(path, content)| (path, Self::of(content)))
            .collect();

        let mut hasher = Sha256::new();
        for (path, digest) in sorted {
            let path = path.to_string_lossy();
            hasher.update((path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
            hasher.update(digest.0);
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Cache key of one build layer: `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerKey(String);

impl LayerKey {
    pub(crate) fn from_hasher(hasher: Sha256) -> Self {
        Self(format!("sha256:{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for display.
    pub fn short(&self) -> &str {
        let hex = self.0.strip_prefix("sha256:").unwrap_or(&self.0);
        &hex[..hex.len().min(12)]
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content the copy steps depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerInputs {
    /// Bytes of the dependency manifest
    pub manifest: ContentDigest,
    /// The whole application file set (manifest included)
    pub application: ContentDigest,
}

impl LayerInputs {
    /// Hash the manifest and every file in `files` (relative to `project_dir`).
    pub fn from_project(
        project_dir: &Path,
        manifest: &Path,
        files: &[PathBuf],
    ) -> Result<Self, LayerError> {
        let manifest_bytes = read(&project_dir.join(manifest))?;

        let mut contents = Vec::with_capacity(files.len());
        for relative in files {
            contents.push((relative.as_path(), read(&project_dir.join(relative))?));
        }

        Ok(Self {
            manifest: ContentDigest::of(&manifest_bytes),
            application: ContentDigest::of_file_set(
                contents.iter().map(|(p, c)| (*p, c.as_slice())),
            ),
        })
    }
}

fn read(path: &Path) -> Result<Vec<u8>, LayerError> {
    std::fs::read(path).map_err(|e| LayerError::Read {
        path: path.to_path_buf(),
        source: e,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("failed to read {path} for layer digest")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}
