use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::{CacheError, Result, ENTRY_EXTENSION, STORE_VERSION};

/// Durable backing for [`FingerprintCache`](super::FingerprintCache)
///
/// Only successful results are ever saved.
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` when nothing is stored for `key`
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn save(&self, key: &str, value: &[u8]) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    version: u32,
    key: String,
    payload: Vec<u8>,
}

/// One bincode file per key, named by the BLAKE3 digest of the key
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = blake3::hash(key.as_bytes());
        self.dir
            .join(format!("{}.{}", digest.to_hex(), ENTRY_EXTENSION))
    }
}

impl CacheStore for DiskStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::from(e)),
        };

        let entry: StoredEntry = bincode::deserialize(&bytes)?;
        if entry.version != STORE_VERSION {
            return Err(CacheError::VersionMismatch {
                expected: STORE_VERSION,
                found: entry.version,
            });
        }
        if entry.key != key {
            return Err(CacheError::KeyMismatch {
                expected: key.to_string(),
                found: entry.key,
            });
        }

        Ok(Some(entry.payload))
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<()> {
        let entry = StoredEntry {
            version: STORE_VERSION,
            key: key.to_string(),
            payload: value.to_vec(),
        };
        let bytes = bincode::serialize(&entry)?;

        // Readers only ever see complete entries
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(self.entry_path(key)).map_err(|e| e.error)?;
        Ok(())
    }
}
