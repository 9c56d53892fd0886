//! Per-run lifecycle record
//!
//! ```text
//! Created -> Rendering -> Rendered -> Executing -> Executed -> Parsing -> Complete
//!                |                        |   \                   |
//!                v                        v    v                  v
//!              Failed                  Failed  Cancelled        Failed
//! ```

use crate::artifacts::ArtifactPaths;
use crate::execution::{ExecutionResult, ExecutionStatus};
use crate::identity::RunIdentity;
use crate::results::MetricsSummary;
use crate::spec::TestSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Created,
    Rendering,
    Rendered,
    Executing,
    Executed,
    Parsing,
    Complete,
    Failed,
    Cancelled,
}

impl RunStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStage::Complete | RunStage::Failed | RunStage::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: RunStage) -> bool {
        use RunStage::*;
        matches!(
            (self, next),
            (Created, Rendering)
                | (Rendering, Rendered)
                | (Rendering, Failed)
                | (Rendered, Executing)
                | (Executing, Executed)
                | (Executing, Failed)
                | (Executing, Cancelled)
                | (Executed, Parsing)
                | (Parsing, Complete)
                | (Parsing, Failed)
        )
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStage::Created => "created",
            RunStage::Rendering => "rendering",
            RunStage::Rendered => "rendered",
            RunStage::Executing => "executing",
            RunStage::Executed => "executed",
            RunStage::Parsing => "parsing",
            RunStage::Complete => "complete",
            RunStage::Failed => "failed",
            RunStage::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Which component a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad input or a broken plan skeleton
    Template,
    /// Artifact I/O
    Storage,
    /// The engine did not finish successfully
    Process { status: ExecutionStatus },
    /// The engine reported success but left no result file
    Parse,
    /// The orchestrator could not schedule the run
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Template => f.write_str("template"),
            FailureKind::Storage => f.write_str("storage"),
            FailureKind::Process { status } => write!(f, "process ({status})"),
            FailureKind::Parse => f.write_str("parse"),
            FailureKind::Internal => f.write_str("internal"),
        }
    }
}

/// The originating error of a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    /// Stage that was active when the error occurred
    pub stage: RunStage,
    pub message: String,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error during {}: {}", self.kind, self.stage, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: RunStage,
    pub at: DateTime<Utc>,
}

/// Everything known about one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub identity: RunIdentity,
    pub spec: TestSpec,
    pub stage: RunStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactPaths>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<MetricsSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub transitions: Vec<StageTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(identity: RunIdentity, spec: TestSpec) -> Self {
        let now = Utc::now();
        Self {
            identity,
            spec,
            stage: RunStage::Created,
            artifacts: None,
            execution: None,
            summary: None,
            failure: None,
            transitions: vec![StageTransition {
                stage: RunStage::Created,
                at: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn advance(&mut self, next: RunStage) -> bool {
        if !self.stage.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        self.stage = next;
        self.updated_at = now;
        self.transitions.push(StageTransition {
            stage: next,
            at: now,
        });
        true
    }

    /// Record `kind`/`message` against the current stage and move to `Failed`
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> bool {
        let failure = RunFailure {
            kind,
            stage: self.stage,
            message: message.into(),
        };
        if self.advance(RunStage::Failed) {
            self.failure = Some(failure);
            true
        } else {
            false
        }
    }

    /// Human-readable one-line account of where the run stands
    pub fn diagnostic(&self) -> String {
        match (&self.stage, &self.failure) {
            (RunStage::Failed, Some(failure)) => failure.to_string(),
            (RunStage::Cancelled, _) => "run cancelled".into(),
            (RunStage::Complete, _) => match &self.summary {
                Some(summary) => format!(
                    "complete ({}): {} samples, {} failed",
                    summary.status, summary.total_samples, summary.failed_samples
                ),
                None => "complete".into(),
            },
            (stage, _) => format!("in progress ({stage})"),
        }
    }
}
