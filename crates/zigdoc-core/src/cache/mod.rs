//! Fingerprint cache for external tool output
//!
//! Results are keyed by file identity (path, modification time, size) and
//! computed at most once per key, no matter how many threads ask for the
//! same file at the same time. An optional on-disk store lets results
//! survive across runs.

mod error;
mod key;
mod memo;
mod store;

pub use error::{CacheError, Result};
pub use key::{resolve_source, CacheKey};
pub use memo::{FailurePolicy, FingerprintCache, Lookup};
pub use store::{CacheStore, DiskStore};

/// Store format version - increment when the on-disk entry layout changes
pub const STORE_VERSION: u32 = 1;

/// Default directory name for the durable store
pub const CACHE_DIR_NAME: &str = ".zigdoc-cache";

/// File extension of durable store entries
pub const ENTRY_EXTENSION: &str = "bin";
