use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::runner::Tool;

/// Errors surfaced by the template functions and the warmup pass
///
/// `Clone` so a single failed computation can be handed to every caller
/// that was waiting on it; I/O errors are shared behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum DocError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("source file not found: {path}: {source}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("error executing {tool} for [{path}]: {status}: {stderr}")]
    ExternalTool {
        tool: Tool,
        path: PathBuf,
        status: String,
        stderr: String,
        timed_out: bool,
    },

    #[error("failed to launch {tool} ({program}): {source}")]
    Spawn {
        tool: Tool,
        program: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: Arc<io::Error>,
    },
}

impl DocError {
    pub fn not_found(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DocError::NotFound {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        DocError::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    /// Diagnostic text captured from the external tool, if any
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            DocError::ExternalTool { stderr, .. } => Some(stderr.as_str()),
            _ => None,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, DocError::Config(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DocError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, DocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_tool_display_keeps_stderr() {
        let err = DocError::ExternalTool {
            tool: Tool::Docgen,
            path: PathBuf::from("samples/hello.md"),
            status: "exit status: 1".to_string(),
            stderr: "error: expected ';'".to_string(),
            timed_out: false,
        };

        let msg = err.to_string();
        assert!(msg.contains("docgen"));
        assert!(msg.contains("samples/hello.md"));
        assert!(msg.contains("expected ';'"));
        assert_eq!(err.diagnostics(), Some("error: expected ';'"));
    }

    #[test]
    fn test_not_found_keeps_source() {
        let err = DocError::not_found(
            "missing.zig",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );

        assert!(err.is_not_found());
        assert!(err.to_string().contains("missing.zig"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.diagnostics().is_none());
    }

    #[test]
    fn test_clone_shares_io_error() {
        let err = DocError::io("scratch dir", io::Error::other("disk full"));
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
