use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::{DocError, Result};

/// Identity of a source file at a point in time
///
/// Modification time plus size stands in for the file's content. A rewrite
/// that keeps both the size and the timestamp aliases to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    path: PathBuf,
    modified_secs: u64,
    modified_nanos: u32,
    size: u64,
}

impl CacheKey {
    pub fn new(path: impl Into<PathBuf>, modified: SystemTime, size: u64) -> Self {
        // Timestamps before the epoch collapse to zero; they still key deterministically.
        let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();

        Self {
            path: path.into(),
            modified_secs: since_epoch.as_secs(),
            modified_nanos: since_epoch.subsec_nanos(),
            size,
        }
    }

    /// Stat `path` and build its key
    ///
    /// The key keeps the path exactly as given. Fails with
    /// [`DocError::NotFound`] when the path is missing or is not a regular file.
    pub fn derive(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| DocError::not_found(path, e))?;

        if !metadata.is_file() {
            return Err(DocError::not_found(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        let modified = metadata
            .modified()
            .map_err(|e| DocError::not_found(path, e))?;

        Ok(Self::new(path, modified, metadata.len()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Modification time as (seconds, nanoseconds) since the Unix epoch
    pub fn modified(&self) -> (u64, u32) {
        (self.modified_secs, self.modified_nanos)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}.{:09}:{}",
            self.path.display(),
            self.modified_secs,
            self.modified_nanos,
            self.size
        )
    }
}

/// Canonical absolute form of a source path
///
/// External tools run from a scratch directory, so relative paths must be
/// resolved before they are handed over.
pub fn resolve_source(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| DocError::not_found(path, e))
}
