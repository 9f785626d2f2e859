//! External tool invocation
//!
//! Builds the command line for docgen and doctest, runs the tool with its
//! output captured, and turns a non-zero exit into a [`DocError`] that keeps
//! the tool's stderr.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::ToolConfig;
use crate::errors::{DocError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long a timed-out tool gets between SIGTERM and SIGKILL
#[cfg(unix)]
const KILL_GRACE: Duration = Duration::from_millis(500);

/// The two external tools behind the template functions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Docgen,
    Doctest,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::Docgen => "docgen",
            Tool::Doctest => "doctest",
        }
    }

    /// Name of the template function exposed to the host
    pub fn func_name(self) -> &'static str {
        match self {
            Tool::Docgen => "Docgen",
            Tool::Doctest => "Doctest",
        }
    }

    /// Extension of the files the warmup pass feeds to this tool
    pub fn default_extension(self) -> &'static str {
        match self {
            Tool::Docgen => "md",
            Tool::Doctest => "zig",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tool {
    type Err = DocError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "docgen" => Ok(Tool::Docgen),
            "doctest" => Ok(Tool::Doctest),
            _ => Err(DocError::Config(format!(
                "unknown template function `{}` (expected Docgen or Doctest)",
                s
            ))),
        }
    }
}

/// A fully assembled tool command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Run from a throwaway working directory
    pub scratch_dir: bool,
}

/// Runs docgen and doctest against absolute source paths
#[derive(Debug, Clone)]
pub struct Runner {
    tools: ToolConfig,
}

impl Runner {
    pub fn new(tools: ToolConfig) -> Self {
        Self { tools }
    }

    /// Command line for running `tool` on `source`
    ///
    /// - docgen: `<docgen> <zig> <source> <output_sink>`
    /// - doctest: `<doctest> inline --in_file <source> [--zig_exe <zig>]`
    pub fn invocation(&self, tool: Tool, source: &Path) -> Result<Invocation> {
        match tool {
            Tool::Docgen => {
                let program = self.tools.docgen_exe()?.to_path_buf();
                let compiler = self.tools.compiler_exe()?;
                Ok(Invocation {
                    program,
                    args: vec![
                        compiler.into(),
                        source.into(),
                        self.tools.output_sink.clone().into(),
                    ],
                    scratch_dir: true,
                })
            }
            Tool::Doctest => {
                let program = self.tools.doctest_exe()?.to_path_buf();
                let mut args: Vec<OsString> = vec!["inline".into(), "--in_file".into(), source.into()];
                if let Some(compiler) = self.tools.compiler.as_deref() {
                    args.push("--zig_exe".into());
                    args.push(compiler.into());
                }
                Ok(Invocation {
                    program,
                    args,
                    scratch_dir: false,
                })
            }
        }
    }

    /// Run `tool` on `source` and return its stdout
    ///
    /// `source` must already be absolute; the tool may run from a scratch
    /// directory.
    pub fn run(&self, tool: Tool, source: &Path) -> Result<Vec<u8>> {
        let invocation = self.invocation(tool, source)?;

        // Removed when dropped, on every path out of this function
        let scratch = if invocation.scratch_dir {
            Some(
                tempfile::Builder::new()
                    .prefix(&format!("zig_{}", tool.name()))
                    .tempdir()
                    .map_err(|e| DocError::io("failed to make scratch directory", e))?,
            )
        } else {
            None
        };

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &scratch {
            command.current_dir(dir.path());
        }

        // Own process group, so a deadline kill also reaches whatever the tool
        // spawned (docgen runs the compiler) and the output pipes close
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        debug!(
            "Running {} {:?} {:?}",
            tool,
            invocation.program,
            invocation.args
        );

        let mut child = command.spawn().map_err(|e| DocError::Spawn {
            tool,
            program: invocation.program.clone(),
            source: Arc::new(e),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_reader = thread::spawn(move || read_stream(stdout));
        let stderr_reader = thread::spawn(move || read_stream(stderr));

        let timeout = self.tools.timeout();
        let (status, timed_out) = wait_with_deadline(&mut child, timeout)
            .map_err(|e| DocError::io(format!("failed to wait for {}", tool), e))?;

        let out = join_reader(stdout_reader, "stdout")?;
        let err = join_reader(stderr_reader, "stderr")?;

        if timed_out || !status.success() {
            let status = match timeout {
                Some(limit) if timed_out => format!("timed out after {:?}", limit),
                _ => status.to_string(),
            };
            return Err(DocError::ExternalTool {
                tool,
                path: source.to_path_buf(),
                status,
                stderr: String::from_utf8_lossy(&err).into_owned(),
                timed_out,
            });
        }

        Ok(out)
    }
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Option<Duration>,
) -> io::Result<(ExitStatus, bool)> {
    let Some(timeout) = timeout else {
        return child.wait().map(|status| (status, false));
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, false));
        }

        if start.elapsed() >= timeout {
            return terminate_process_tree(child).map(|status| (status, true));
        }

        thread::sleep(POLL_INTERVAL.min(timeout.saturating_sub(start.elapsed())));
    }
}

fn terminate_process_tree(child: &mut Child) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        // The group id is the child's pid (`process_group(0)` above)
        let pgid = child.id() as libc::pid_t;
        unsafe {
            libc::kill(-pgid, libc::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < KILL_GRACE {
            if child.try_wait()?.is_some() {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        // Grandchildren may outlive the tool itself and still hold its pipes
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
        child.wait()
    }

    #[cfg(not(unix))]
    {
        // The child may exit between the poll and the kill
        let _ = child.kill();
        child.wait()
    }
}

fn read_stream(stream: Option<impl Read>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

fn join_reader(handle: thread::JoinHandle<io::Result<Vec<u8>>>, stream: &str) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| DocError::io(format!("{} reader", stream), io::Error::other("thread panicked")))?
        .map_err(|e| DocError::io(format!("failed to read tool {}", stream), e))
}
