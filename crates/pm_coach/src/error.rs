//! Error types for the differential harness.
//!
//! Only environment and persistence failures are errors. Anything that goes
//! wrong inside an engine run (timeouts, launch failures, crashes) is folded
//! into the captured exit code and classified as a test result instead.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that abort a run or a single target.
#[derive(Debug, Error)]
pub enum CoachError {
    /// No candidate directory contains the engine entry point.
    #[error("cannot find {marker} in any candidate project root (searched: {searched})")]
    ProjectRootNotFound { marker: String, searched: String },

    /// A repo source does not expose a checkout on disk.
    #[error("repo source '{name}' does not expose a local filesystem path")]
    MissingLocalPath { name: String },

    /// A target could not be turned into a repo source.
    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Filesystem error with the path that caused it.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON encoding or decoding failure.
    #[error("failed to serialize {what}: {source}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file or value is unusable.
    #[error("invalid configuration {path}: {reason}")]
    Config { path: String, reason: String },

    /// The worker pool could not be built.
    #[error("worker pool: {0}")]
    WorkerPool(String),
}

impl CoachError {
    /// Wraps an `io::Error` with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wraps a `serde_json::Error` with a short description of the payload.
    pub fn json(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            what: what.into(),
            source,
        }
    }

    /// Returns true for errors that describe the environment rather than a
    /// single target. These abort the whole run.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            Self::ProjectRootNotFound { .. }
                | Self::MissingLocalPath { .. }
                | Self::Config { .. }
                | Self::WorkerPool(_)
        )
    }
}

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, CoachError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_root_error_lists_searched_paths() {
        let err = CoachError::ProjectRootNotFound {
            marker: "pm_encoder.py".to_string(),
            searched: "/a, /b".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("pm_encoder.py"));
        assert!(msg.contains("/a, /b"));
        assert!(err.is_environment());
    }

    #[test]
    fn io_error_keeps_path_and_source() {
        let err = CoachError::io("/tmp/x", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.to_string().contains("/tmp/x"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_environment());
    }
}
