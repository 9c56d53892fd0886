use loadsmith_core::{RunIdentity, RunStage};
use thiserror::Error;

/// Errors returned to callers of the orchestrator.
///
/// Failures inside a run never surface here; they are recorded on the run's
/// [`loadsmith_core::RunState`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A run with this identity is still in progress
    #[error("Run '{0}' is already active")]
    Conflict(RunIdentity),

    #[error("Unknown run '{0}'")]
    NotFound(RunIdentity),

    #[error("Run '{identity}' has no summary in stage {stage}")]
    NotComplete {
        identity: RunIdentity,
        stage: RunStage,
    },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
