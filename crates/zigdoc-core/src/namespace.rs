use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{resolve_source, CacheKey, FingerprintCache};
use crate::errors::{DocError, Result};
use crate::runner::{Runner, Tool};
use crate::warmup::{Warmup, WarmupHandle, WarmupOptions};

/// Output produced by a template function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Tool stdout exactly as written
    pub bytes: Arc<[u8]>,
    /// `bytes` as UTF-8; invalid sequences become U+FFFD
    pub text: String,
    /// `false` when this call ran the external tool
    pub cached: bool,
}

/// The `zig` template namespace: `Docgen` and `Doctest` over one shared cache
pub struct Namespace {
    cache: Arc<FingerprintCache<DocError>>,
    runner: Runner,
}

impl Namespace {
    /// Name the namespace is registered under in the host
    pub const NAME: &'static str = "zig";

    pub fn new(cache: Arc<FingerprintCache<DocError>>, runner: Runner) -> Self {
        Self { cache, runner }
    }

    pub fn cache(&self) -> &Arc<FingerprintCache<DocError>> {
        &self.cache
    }

    /// Generated documentation for a markdown sample
    pub fn docgen(&self, path: impl AsRef<Path>) -> Result<Rendered> {
        self.render(Tool::Docgen, path.as_ref())
    }

    /// Doctest output for a Zig source file
    pub fn doctest(&self, path: impl AsRef<Path>) -> Result<Rendered> {
        self.render(Tool::Doctest, path.as_ref())
    }

    /// Dispatch a host call by template function name (`Docgen` / `Doctest`)
    pub fn invoke(&self, func: &str, arg: &str) -> Result<Rendered> {
        let tool: Tool = func.parse()?;
        self.render(tool, Path::new(arg))
    }

    pub fn render(&self, tool: Tool, path: &Path) -> Result<Rendered> {
        let key = CacheKey::derive(path)?;
        let cache_key = format!("{}:{}", tool, key);

        let lookup = self.cache.get_or_compute(&cache_key, || {
            let source = resolve_source(path)?;
            debug!("[Zig {}] <{}> GENERATING", tool.func_name(), path.display());
            self.runner.run(tool, &source)
        })?;

        if lookup.cached {
            debug!("[Zig {}] <{}> CACHED", tool.func_name(), path.display());
        }

        Ok(Rendered {
            text: lookup.text(),
            bytes: lookup.value,
            cached: lookup.cached,
        })
    }

    /// Start a background warmup pass feeding every matching file through
    /// `options.tool`
    pub fn start_warmup(self: &Arc<Self>, options: WarmupOptions) -> Result<WarmupHandle> {
        let namespace = Arc::clone(self);
        let tool = options.tool;
        Warmup::new(options).spawn(move |path| namespace.render(tool, path).map(|r| r.cached))
    }
}
