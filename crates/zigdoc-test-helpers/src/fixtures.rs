//! Sample trees and source snippets

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const HELLO_MD: &str = "# Hello\n\n{#code_begin|exe|hello#}\nconst std = @import(\"std\");\n{#code_end#}\n";

pub const HELLO_ZIG: &str = r#"const std = @import("std");

test "hello" {
    try std.testing.expect(true);
}
"#;

pub const BROKEN_ZIG: &str = "test \"broken\" {\n    undeclared();\n}\n";

/// A throwaway directory of sample files, removed on drop
pub struct SampleTree {
    dir: TempDir,
}

impl SampleTree {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create sample tree"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `relative`, creating parent directories
    pub fn file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create sample directory");
        }
        fs::write(&path, contents).expect("failed to write sample file");
        path
    }

    /// Create an empty directory under the tree
    pub fn dir(&self, relative: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        fs::create_dir_all(&path).expect("failed to create sample directory");
        path
    }
}

impl Default for SampleTree {
    fn default() -> Self {
        Self::new()
    }
}
