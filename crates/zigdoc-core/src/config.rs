use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::FailurePolicy;
use crate::errors::{DocError, Result};
use crate::runner::Tool;

/// Configuration file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "zigdoc.yaml";

pub const ENV_DOCGEN: &str = "ZIG_DOCGEN";
pub const ENV_COMPILER: &str = "ZIG_COMPILER";
pub const ENV_DOCTEST: &str = "ZIG_DOCTEST";
pub const ENV_RENDER_TESTS: &str = "ZIGDOC_RENDER_TESTS";

/// Locations of the external tools and how to run them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    /// Docgen executable
    #[serde(default)]
    pub docgen: Option<PathBuf>,

    /// Zig compiler handed to docgen (and to doctest via `--zig_exe`)
    #[serde(default)]
    pub compiler: Option<PathBuf>,

    /// Doctest executable
    #[serde(default)]
    pub doctest: Option<PathBuf>,

    /// Where docgen writes its output (default: /dev/stdout)
    #[serde(default = "default_output_sink")]
    pub output_sink: PathBuf,

    /// Kill a tool that runs longer than this (default: no deadline)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_output_sink() -> PathBuf {
    PathBuf::from("/dev/stdout")
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            docgen: None,
            compiler: None,
            doctest: None,
            output_sink: default_output_sink(),
            timeout_secs: None,
        }
    }
}

impl ToolConfig {
    pub fn docgen_exe(&self) -> Result<&Path> {
        required(self.docgen.as_deref(), "docgen", ENV_DOCGEN, "tools.docgen")
    }

    pub fn compiler_exe(&self) -> Result<&Path> {
        required(self.compiler.as_deref(), "zig", ENV_COMPILER, "tools.compiler")
    }

    pub fn doctest_exe(&self) -> Result<&Path> {
        required(self.doctest.as_deref(), "doctest", ENV_DOCTEST, "tools.doctest")
    }

    /// Check that everything `tool` needs is configured
    pub fn require(&self, tool: Tool) -> Result<()> {
        match tool {
            Tool::Docgen => {
                self.docgen_exe()?;
                self.compiler_exe()?;
            }
            Tool::Doctest => {
                self.doctest_exe()?;
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn required<'a>(value: Option<&'a Path>, what: &str, env: &str, key: &str) -> Result<&'a Path> {
    match value {
        Some(path) if !path.as_os_str().is_empty() => Ok(path),
        _ => Err(DocError::Config(format!(
            "missing {} location, set `{}` (or `{}`) to the path where the {} executable lives",
            what, env, key, what
        ))),
    }
}

/// Background warmup pass settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupConfig {
    /// Warm the cache when the namespace starts (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Directory walked for samples
    #[serde(default = "default_warmup_root")]
    pub root: PathBuf,

    /// Template function the samples are run through
    #[serde(default)]
    pub tool: Tool,

    /// File extension to pick up; defaults per tool (docgen: md, doctest: zig)
    #[serde(default)]
    pub extension: Option<String>,

    /// Worker threads; defaults to the available parallelism
    #[serde(default)]
    pub workers: Option<usize>,

    /// Capacity of the job queue between the walk and the workers
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_warmup_root() -> PathBuf {
    PathBuf::from("docgen-samples")
}

fn default_queue_capacity() -> usize {
    20
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root: default_warmup_root(),
            tool: Tool::default(),
            extension: None,
            workers: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl WarmupConfig {
    /// Extension without its leading dot
    pub fn extension(&self) -> String {
        match &self.extension {
            Some(ext) => ext.trim_start_matches('.').to_string(),
            None => self.tool.default_extension().to_string(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Result cache settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Durable store directory; results only live in memory when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// Main configuration, populated once at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZigdocConfig {
    #[serde(default)]
    pub tools: ToolConfig,

    #[serde(default)]
    pub warmup: WarmupConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// Values given on the command line; `None` leaves the loaded value alone
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub docgen: Option<PathBuf>,
    pub compiler: Option<PathBuf>,
    pub doctest: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub cache_dir: Option<PathBuf>,
    pub failure_policy: Option<FailurePolicy>,
    pub warmup_enabled: Option<bool>,
    pub warmup_root: Option<PathBuf>,
    pub warmup_tool: Option<Tool>,
    pub extension: Option<String>,
    pub workers: Option<usize>,
}

const DEFAULT_CONFIG: &str = r#"# zigdoc configuration
# Environment variables ZIG_DOCGEN, ZIG_COMPILER and ZIG_DOCTEST override the tool paths.

tools:
  # docgen: /path/to/docgen
  # compiler: /path/to/zig
  # doctest: /path/to/doctest
  outputSink: /dev/stdout
  # timeoutSecs: 120

warmup:
  enabled: false          # or set ZIGDOC_RENDER_TESTS=true
  root: docgen-samples
  tool: docgen            # docgen (walks .md) or doctest (walks .zig)
  queueCapacity: 20

cache:
  # dir: .zigdoc-cache    # keep results across runs
  failurePolicy: retry    # retry or memoize
"#;

impl ZigdocConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DocError::io(format!("failed to read {}", path.display()), e))?;
        Self::from_yaml(&content)
            .map_err(|e| DocError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| DocError::Config(e.to_string()))
    }

    /// Load `path`, or `zigdoc.yaml` from the working directory if present,
    /// or fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let default_path = Path::new(CONFIG_FILE_NAME);
        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the commented default configuration to `path`
    pub fn init_file(path: &Path) -> Result<()> {
        std::fs::write(path, DEFAULT_CONFIG)
            .map_err(|e| DocError::io(format!("failed to write {}", path.display()), e))
    }

    /// Apply environment overrides; empty values count as unset
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(path) = get(ENV_DOCGEN) {
            self.tools.docgen = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_COMPILER) {
            self.tools.compiler = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_DOCTEST) {
            self.tools.doctest = Some(PathBuf::from(path));
        }
        if let Some(flag) = get(ENV_RENDER_TESTS) {
            self.warmup.enabled = parse_flag(ENV_RENDER_TESTS, &flag)?;
        }

        Ok(())
    }

    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Merge CLI overrides into this configuration
    pub fn merge(&mut self, overrides: &CliOverrides) {
        if let Some(ref path) = overrides.docgen {
            self.tools.docgen = Some(path.clone());
        }
        if let Some(ref path) = overrides.compiler {
            self.tools.compiler = Some(path.clone());
        }
        if let Some(ref path) = overrides.doctest {
            self.tools.doctest = Some(path.clone());
        }
        if let Some(secs) = overrides.timeout_secs {
            self.tools.timeout_secs = Some(secs);
        }
        if let Some(ref dir) = overrides.cache_dir {
            self.cache.dir = Some(dir.clone());
        }
        if let Some(policy) = overrides.failure_policy {
            self.cache.failure_policy = policy;
        }
        if let Some(enabled) = overrides.warmup_enabled {
            self.warmup.enabled = enabled;
        }
        if let Some(ref root) = overrides.warmup_root {
            self.warmup.root = root.clone();
        }
        if let Some(tool) = overrides.warmup_tool {
            self.warmup.tool = tool;
        }
        if let Some(ref ext) = overrides.extension {
            self.warmup.extension = Some(ext.clone());
        }
        if let Some(workers) = overrides.workers {
            self.warmup.workers = Some(workers);
        }
    }

    /// Reject configurations that would only fail later, deep in a render
    pub fn validate(&self) -> Result<()> {
        if self.warmup.workers == Some(0) {
            return Err(DocError::Config(
                "warmup.workers must be at least 1".to_string(),
            ));
        }
        if self.warmup.queue_capacity == 0 {
            return Err(DocError::Config(
                "warmup.queueCapacity must be at least 1".to_string(),
            ));
        }
        if self.warmup.extension().is_empty() {
            return Err(DocError::Config(
                "warmup.extension must not be empty".to_string(),
            ));
        }
        if self.tools.timeout_secs == Some(0) {
            return Err(DocError::Config(
                "tools.timeoutSecs must be at least 1".to_string(),
            ));
        }
        if self.warmup.enabled {
            self.tools.require(self.warmup.tool)?;
        }
        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DocError::Config(format!(
            "`{}` must be a boolean flag, got `{}`",
            name, other
        ))),
    }
}
