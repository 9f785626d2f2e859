//! Stand-ins for the external Zig tools
//!
//! Each stub is a small shell script that appends its arguments to a
//! `<name>.calls` file next to it before doing its job, so tests can count
//! how often the real tool would have run.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StubTool {
    path: PathBuf,
    calls: PathBuf,
}

impl StubTool {
    /// Write an executable script `name` in `dir` running `body`
    pub fn script(dir: &Path, name: &str, body: &str) -> Self {
        let path = dir.join(name);
        let calls = dir.join(format!("{}.calls", name));
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$*\" >> '{}'\n{}\n",
            calls.display(),
            body
        );
        fs::write(&path, script).expect("failed to write stub tool");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("failed to make stub tool executable");
        Self { path, calls }
    }

    /// docgen stand-in: writes the source path to the output sink
    pub fn echo_docgen(dir: &Path) -> Self {
        Self::script(dir, "docgen", "printf '%s' \"$2\" > \"$3\"")
    }

    /// doctest stand-in: prints the `--in_file` argument
    pub fn echo_doctest(dir: &Path) -> Self {
        Self::script(dir, "doctest", "printf '%s' \"$3\"")
    }

    /// Like [`StubTool::echo_doctest`] but takes a while, to widen race windows
    pub fn slow_echo_doctest(dir: &Path) -> Self {
        Self::script(dir, "doctest", "sleep 0.3\nprintf '%s' \"$3\"")
    }

    /// Compiler stand-in; never invoked directly by the stubs above
    pub fn compiler(dir: &Path) -> Self {
        Self::script(dir, "zig", "exit 0")
    }

    /// Exits with status 1 after printing `stderr`
    pub fn failing(dir: &Path, name: &str, stderr: &str) -> Self {
        let quoted = stderr.replace('\'', "'\\''");
        Self::script(dir, name, &format!("printf '%s' '{}' >&2\nexit 1", quoted))
    }

    /// Never finishes on its own; the shell waits on a `sleep` child that
    /// inherits its output pipes
    pub fn sleeping(dir: &Path, name: &str) -> Self {
        Self::script(dir, name, "sleep 30\necho done")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Argument lines of every recorded run
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.calls)
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn invocations(&self) -> usize {
        self.calls().len()
    }
}
