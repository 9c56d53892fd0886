//! Building blocks of the loadsmith pipeline
//!
//! ## Components
//!
//! - [`template`]: renders a [`TestSpec`] into an engine plan
//! - [`artifacts`]: per-run plan/result/log paths under one working area
//! - [`results`]: summarizes an engine result file into a [`MetricsSummary`]
//! - [`execution`]: the outcome record of one engine invocation
//! - [`state`]: the per-run lifecycle record driven by the orchestrator
//!
//! Nothing here spawns processes or owns a run's lifecycle; that is the job
//! of `loadsmith-pipeline`.

pub mod artifacts;
pub mod error;
pub mod execution;
pub mod identity;
pub mod results;
pub mod spec;
pub mod state;
pub mod template;

pub use artifacts::{ArtifactPaths, ArtifactStore};
pub use error::{ProcessError, Result, StorageError, TemplateError};
pub use execution::{ExecutionResult, ExecutionStatus};
pub use identity::RunIdentity;
pub use results::{
    LatencyPercentiles, MalformedReason, MetricsSummary, ParseStatus, ResultParser,
};
pub use spec::{HttpMethod, Protocol, Target, TestSpec};
pub use state::{FailureKind, RunFailure, RunStage, RunState, StageTransition};
pub use template::{PlanDocument, PlanTemplate};
