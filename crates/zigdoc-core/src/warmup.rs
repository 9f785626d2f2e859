//! Background cache warmup
//!
//! Walks a directory tree and pushes every matching file through a bounded
//! queue to a fixed pool of worker threads. Each worker calls the same
//! lookup interactive renders use, so a file that is warmed and requested at
//! the same time still runs its tool only once.

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::WarmupConfig;
use crate::errors::{DocError, Result};
use crate::runner::Tool;

/// What to warm and how wide
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupOptions {
    pub root: PathBuf,
    pub tool: Tool,
    /// Matched against file extensions, without the dot
    pub extension: String,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl WarmupOptions {
    pub fn new(root: impl Into<PathBuf>, tool: Tool) -> Self {
        Self::from_config(&WarmupConfig {
            root: root.into(),
            tool,
            ..WarmupConfig::default()
        })
    }

    pub fn from_config(config: &WarmupConfig) -> Self {
        Self {
            root: config.root.clone(),
            tool: config.tool,
            extension: config.extension(),
            workers: config.workers().max(1),
            queue_capacity: config.queue_capacity.max(1),
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext == self.extension.as_str())
            .unwrap_or(false)
    }
}

/// A file (or subtree) the pass could not process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupFailure {
    pub path: PathBuf,
    pub error: String,
    /// Tool stderr, when the tool itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

/// Outcome of a whole warmup pass
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupReport {
    pub root: PathBuf,
    /// Matching files handed to the queue
    pub discovered: usize,
    /// Files whose tool ran during this pass
    pub rendered: usize,
    /// Files that were already cached (or in flight elsewhere)
    pub cached: usize,
    pub failures: Vec<WarmupFailure>,
    pub walk_errors: Vec<WarmupFailure>,
    pub cancelled: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl WarmupReport {
    pub fn succeeded(&self) -> usize {
        self.rendered + self.cached
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.walk_errors.is_empty()
    }

    pub fn log_summary(&self) {
        info!(
            "Warmup of {} finished in {:?}: {} discovered, {} rendered, {} cached, {} failed",
            self.root.display(),
            self.elapsed,
            self.discovered,
            self.rendered,
            self.cached,
            self.failures.len()
        );
        if self.cancelled {
            info!("Warmup was cancelled before the queue drained");
        }
        for failure in self.walk_errors.iter().chain(&self.failures) {
            warn!("{}: {}", failure.path.display(), failure.error);
        }
    }
}

/// Handle to a warmup pass running on its own thread
pub struct WarmupHandle {
    cancel: Arc<AtomicBool>,
    thread: thread::JoinHandle<WarmupReport>,
}

impl WarmupHandle {
    /// Stop enqueuing and dequeuing; jobs already running finish
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the pass and collect its report
    pub fn join(self) -> Result<WarmupReport> {
        self.thread.join().map_err(|_| {
            DocError::io(
                "warmup",
                std::io::Error::other("warmup thread panicked"),
            )
        })
    }
}

type JobOutcome = (PathBuf, Result<bool>);

struct WalkSummary {
    discovered: usize,
    errors: Vec<WarmupFailure>,
    /// Stopped by cancellation before the tree was exhausted
    cut_short: bool,
}

struct WorkerSummary {
    outcomes: Vec<JobOutcome>,
    /// Dropped a queued job because of cancellation
    cut_short: bool,
}

/// Bounded worker pool over the files of one directory tree
#[derive(Debug, Clone)]
pub struct Warmup {
    options: WarmupOptions,
}

impl Warmup {
    pub fn new(options: WarmupOptions) -> Self {
        Self { options }
    }

    /// Run the pass on a background thread
    ///
    /// `job` is called once per matching file and reports whether the result
    /// was already cached.
    pub fn spawn<F>(self, job: F) -> Result<WarmupHandle>
    where
        F: Fn(&Path) -> Result<bool> + Send + Sync + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);

        let thread = thread::Builder::new()
            .name("zigdoc-warmup".to_string())
            .spawn(move || self.run(&job, &flag))
            .map_err(|e| DocError::io("failed to start warmup thread", e))?;

        Ok(WarmupHandle { cancel, thread })
    }

    /// Run the pass on the calling thread and wait for every worker
    pub fn run<F>(&self, job: &F, cancel: &AtomicBool) -> WarmupReport
    where
        F: Fn(&Path) -> Result<bool> + Sync,
    {
        let start = Instant::now();
        let options = &self.options;
        info!(
            "Warming {} cache from {} (*.{}, {} workers)",
            options.tool,
            options.root.display(),
            options.extension,
            options.workers
        );

        let (tx, rx) = crossbeam_channel::bounded::<PathBuf>(options.queue_capacity);

        let (walk, outcomes, workers_cut_short) = thread::scope(|scope| {
            let workers: Vec<_> = (0..options.workers)
                .map(|_| {
                    let rx = rx.clone();
                    scope.spawn(move || work(rx, job, cancel))
                })
                .collect();
            drop(rx);

            let walk = self.enqueue(tx, cancel);

            let mut outcomes = Vec::with_capacity(walk.discovered);
            let mut cut_short = false;
            for worker in workers {
                match worker.join() {
                    Ok(done) => {
                        outcomes.extend(done.outcomes);
                        cut_short |= done.cut_short;
                    }
                    Err(_) => warn!("Warmup worker panicked; its results are lost"),
                }
            }
            (walk, outcomes, cut_short)
        });

        // A cancel that lands after the queue drained changes nothing
        let mut report = WarmupReport {
            root: options.root.clone(),
            discovered: walk.discovered,
            walk_errors: walk.errors,
            cancelled: walk.cut_short || workers_cut_short,
            ..WarmupReport::default()
        };

        for (path, result) in outcomes {
            match result {
                Ok(true) => report.cached += 1,
                Ok(false) => report.rendered += 1,
                Err(err) => report.failures.push(WarmupFailure {
                    diagnostics: err.diagnostics().map(str::to_string),
                    error: err.to_string(),
                    path,
                }),
            }
        }
        report.failures.sort_by(|a, b| a.path.cmp(&b.path));
        report.elapsed = start.elapsed();
        report
    }

    /// Walk the root and queue matching files; the sender is dropped on
    /// return, which lets workers exit once the queue drains
    fn enqueue(&self, tx: Sender<PathBuf>, cancel: &AtomicBool) -> WalkSummary {
        let mut discovered = 0;
        let mut errors = Vec::new();
        let mut cut_short = false;

        for entry in WalkDir::new(&self.options.root) {
            if cancel.load(Ordering::SeqCst) {
                cut_short = true;
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.options.root.clone());
                    warn!("Skipping {} during warmup: {}", path.display(), err);
                    errors.push(WarmupFailure {
                        path,
                        error: err.to_string(),
                        diagnostics: None,
                    });
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.options.matches(entry.path()) {
                continue;
            }

            discovered += 1;
            if tx.send(entry.into_path()).is_err() {
                // Every worker has stopped
                break;
            }
        }

        WalkSummary {
            discovered,
            errors,
            cut_short,
        }
    }
}

fn work<F>(rx: Receiver<PathBuf>, job: &F, cancel: &AtomicBool) -> WorkerSummary
where
    F: Fn(&Path) -> Result<bool>,
{
    let mut outcomes = Vec::new();
    for path in rx.iter() {
        if cancel.load(Ordering::SeqCst) {
            return WorkerSummary {
                outcomes,
                cut_short: true,
            };
        }
        debug!("Warming {}", path.display());
        let result = job(&path);
        outcomes.push((path, result));
    }
    WorkerSummary {
        outcomes,
        cut_short: false,
    }
}
