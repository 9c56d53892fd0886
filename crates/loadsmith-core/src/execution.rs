use crate::error::ProcessError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How one engine invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    NonZeroExit,
    TimedOut,
    Cancelled,
    /// The engine never started: a configuration problem, not a test result
    SpawnFailed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::NonZeroExit => "non-zero-exit",
            ExecutionStatus::TimedOut => "timed-out",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::SpawnFailed => "spawn-failed",
        };
        f.write_str(label)
    }
}

/// Outcome of one engine invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    /// Where the engine was told to write samples; may be empty or absent
    pub result_path: PathBuf,
    /// Captured stderr, or the launch error for `SpawnFailed`
    pub diagnostics: String,
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub timeout: Duration,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// The failure this outcome represents, if any
    pub fn error(&self) -> Option<ProcessError> {
        match self.status {
            ExecutionStatus::Success => None,
            ExecutionStatus::NonZeroExit => Some(ProcessError::NonZeroExit {
                code: self.exit_code,
                stderr: self.diagnostics.clone(),
            }),
            ExecutionStatus::TimedOut => Some(ProcessError::TimedOut {
                after: self.timeout,
            }),
            ExecutionStatus::Cancelled => Some(ProcessError::Cancelled),
            ExecutionStatus::SpawnFailed => Some(ProcessError::SpawnFailed {
                engine: self.engine.clone(),
                message: self.diagnostics.clone(),
            }),
        }
    }
}
