pub mod cache;
pub mod config;
pub mod errors;
pub mod namespace;
pub mod runner;
pub mod warmup;

pub use cache::{CacheKey, CacheStore, DiskStore, FailurePolicy, FingerprintCache, Lookup};
pub use config::{CliOverrides, ZigdocConfig};
pub use errors::DocError;
pub use namespace::{Namespace, Rendered};
pub use runner::{Runner, Tool};
pub use warmup::{Warmup, WarmupHandle, WarmupOptions, WarmupReport};
