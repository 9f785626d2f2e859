use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use zigdoc_core::config::CONFIG_FILE_NAME;
use zigdoc_core::{
    CliOverrides, DiskStore, DocError, FailurePolicy, FingerprintCache, Namespace, Runner, Tool,
    WarmupHandle, WarmupOptions, WarmupReport, ZigdocConfig,
};

/// zigdoc - memoized Zig docgen and doctest rendering
#[derive(Parser, Debug)]
#[command(name = "zigdoc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to zigdoc.yaml configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Keep rendered results in this directory across runs
    #[arg(long, value_name = "DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Kill a tool that runs longer than this many seconds
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<u64>,

    /// Cache failed renders instead of retrying them
    #[arg(long, global = true)]
    memoize_failures: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render documentation for each markdown sample
    Docgen {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },

    /// Run inline doctests for each Zig source file
    Doctest {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },

    /// Render every sample under a directory ahead of time
    Warmup {
        /// Directory to walk (default: docgen-samples)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Tool to run the samples through (docgen, doctest)
        #[arg(long, value_name = "TOOL")]
        tool: Option<Tool>,

        /// File extension to pick up (default: md for docgen, zig for doctest)
        #[arg(long, value_name = "EXT")]
        ext: Option<String>,

        /// Number of worker threads
        #[arg(short, long, value_name = "N")]
        jobs: Option<usize>,

        /// Print the report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Write a default zigdoc.yaml in the current directory
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    // Rendered output owns stdout, so logs go to stderr
    // Set RUST_LOG=debug to see GENERATING / CACHED for every render
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    let ok = match cli.command {
        Command::Init { force } => {
            init_project(Path::new(CONFIG_FILE_NAME), force)?;
            true
        }
        Command::Docgen { ref files } => {
            let (config, namespace) = setup(&cli)?;
            render_files(&namespace, &config, Tool::Docgen, files)?
        }
        Command::Doctest { ref files } => {
            let (config, namespace) = setup(&cli)?;
            render_files(&namespace, &config, Tool::Doctest, files)?
        }
        Command::Warmup { json, .. } => {
            let (config, namespace) = setup(&cli)?;
            warmup(&namespace, &config, json)?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn setup(cli: &Cli) -> anyhow::Result<(ZigdocConfig, Arc<Namespace>)> {
    let config = load_config(cli)?;
    let namespace = build_namespace(&config)?;
    Ok((config, namespace))
}

/// Write a commented default configuration file
fn init_project(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    ZigdocConfig::init_file(path)?;
    println!("Created {}", path.display());
    Ok(())
}

/// defaults < file < environment < command line
fn load_config(cli: &Cli) -> anyhow::Result<ZigdocConfig> {
    let mut config = ZigdocConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    config.apply_process_env()?;

    let mut overrides = CliOverrides {
        timeout_secs: cli.timeout,
        cache_dir: cli.cache_dir.clone(),
        failure_policy: cli.memoize_failures.then_some(FailurePolicy::Memoize),
        ..CliOverrides::default()
    };
    if let Command::Warmup {
        ref root,
        tool,
        ref ext,
        jobs,
        ..
    } = cli.command
    {
        overrides.warmup_root = root.clone();
        overrides.warmup_tool = tool;
        overrides.extension = ext.clone();
        overrides.workers = jobs;
    }
    config.merge(&overrides);

    config.validate().context("invalid configuration")?;
    debug!("Configuration: {:?}", config);
    Ok(config)
}

fn build_namespace(config: &ZigdocConfig) -> anyhow::Result<Arc<Namespace>> {
    let mut cache: FingerprintCache<DocError> =
        FingerprintCache::with_policy(config.cache.failure_policy);

    if let Some(ref dir) = config.cache.dir {
        let store = DiskStore::open(dir)
            .with_context(|| format!("failed to open cache directory {}", dir.display()))?;
        debug!("Using durable cache at {}", dir.display());
        cache = cache.with_store(Arc::new(store));
    }

    Ok(Arc::new(Namespace::new(
        Arc::new(cache),
        Runner::new(config.tools.clone()),
    )))
}

/// Render `files` in order, printing each result; returns false if any failed
fn render_files(
    namespace: &Arc<Namespace>,
    config: &ZigdocConfig,
    tool: Tool,
    files: &[PathBuf],
) -> anyhow::Result<bool> {
    let background = if config.warmup.enabled {
        Some(namespace.start_warmup(WarmupOptions::from_config(&config.warmup))?)
    } else {
        None
    };

    let mut stdout = std::io::stdout().lock();
    let mut ok = true;
    for file in files {
        match namespace.render(tool, file) {
            Ok(rendered) => {
                stdout.write_all(&rendered.bytes)?;
                if !rendered.bytes.ends_with(b"\n") {
                    stdout.write_all(b"\n")?;
                }
                stdout.flush()?;
            }
            Err(err) => {
                ok = false;
                eprintln!("error: {}", err);
            }
        }
    }

    if let Some(handle) = background {
        ok &= finish_warmup(handle)?.is_clean();
    }

    Ok(ok)
}

fn warmup(namespace: &Arc<Namespace>, config: &ZigdocConfig, json: bool) -> anyhow::Result<bool> {
    config.tools.require(config.warmup.tool)?;

    let handle = namespace.start_warmup(WarmupOptions::from_config(&config.warmup))?;
    let report = finish_warmup(handle)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(report.is_clean())
}

fn finish_warmup(handle: WarmupHandle) -> anyhow::Result<WarmupReport> {
    let report = handle.join().context("warmup did not finish")?;
    report.log_summary();
    Ok(report)
}
