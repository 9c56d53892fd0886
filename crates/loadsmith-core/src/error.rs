//! Error types for loadsmith-core

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid test input or a broken plan skeleton. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Invalid test spec: {0}")]
    InvalidSpec(String),

    #[error("Plan skeleton is missing substitution point '{0}'")]
    MissingPlaceholder(&'static str),

    #[error("Rendered plan still contains placeholder '{0}'")]
    UnresolvedPlaceholder(String),
}

/// Artifact I/O failure
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path {0} is outside the working area")]
    OutsideWorkingArea(PathBuf),

    #[error("Cannot derive an artifact name from '{0}'")]
    InvalidName(String),

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a single retry is worthwhile (interrupted calls and
    /// directory-creation races)
    pub fn is_transient(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            StorageError::Io { source, .. } => matches!(
                source.kind(),
                ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::AlreadyExists
            ),
            _ => false,
        }
    }
}

/// Engine invocation failure, derived from a finished [`crate::ExecutionResult`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Failed to launch engine '{engine}': {message}")]
    SpawnFailed { engine: String, message: String },

    #[error("Engine exited with {}: {stderr}", exit_label(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Engine timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration },

    #[error("Engine run cancelled")]
    Cancelled,
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;
