//! Pipeline Orchestrator
//!
//! Drives each run through Render -> Execute -> Parse on its own task and
//! keeps the resulting [`RunState`] for callers to inspect.
//!
//! ## Guarantees
//!
//! - At most one active run per [`RunIdentity`]; a second start is a
//!   [`PipelineError::Conflict`].
//! - At most `max_concurrent` engine processes at once. A run waiting for a
//!   slot is already `Executing` and can be cancelled.
//! - Stages of one run are strictly sequential, and every failure is
//!   recorded on the run with the stage it happened in.
//! - Cancellation is only acted on in `Executing`. A cancel issued earlier is
//!   held until the run gets there; one issued later is ignored.
//!
//! ```text
//! Orchestrator
//!   ├─> PlanTemplate   (Rendering)
//!   ├─> ArtifactStore  (Rendering, shared by all runs)
//!   ├─> EngineRunner   (Executing, bounded by the slot semaphore)
//!   └─> ResultParser   (Parsing)
//! ```

use crate::error::{PipelineError, Result};
use crate::runner::{EngineCommand, EngineRunner, ProcessRunner};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use loadsmith_config::{LoadsmithConfig, RunConfig};
use loadsmith_core::{
    ArtifactPaths, ArtifactStore, ExecutionStatus, FailureKind, MetricsSummary, PlanTemplate,
    ResultParser, RunIdentity, RunStage, RunState, StorageError, TestSpec,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

struct RunEntry {
    state: Arc<watch::Sender<RunState>>,
    cancel: CancellationToken,
}

impl RunEntry {
    fn snapshot(&self) -> RunState {
        self.state.borrow().clone()
    }
}

/// Handle the driving task uses to move its run through the lifecycle
struct RunTracker {
    state: Arc<watch::Sender<RunState>>,
}

impl RunTracker {
    fn stage(&self) -> RunStage {
        self.state.borrow().stage
    }

    fn update(&self, modify: impl FnOnce(&mut RunState)) {
        self.state.send_modify(modify);
    }

    fn advance(&self, next: RunStage) -> bool {
        let mut from = None;
        self.state.send_if_modified(|state| {
            let previous = state.stage;
            let moved = state.advance(next);
            if moved {
                from = Some(previous);
            }
            moved
        });
        match from {
            Some(previous) => {
                info!(from = %previous, to = %next, "Run stage changed");
                true
            }
            None => {
                warn!(stage = %self.stage(), to = %next, "Ignored invalid stage transition");
                false
            }
        }
    }

    fn fail(&self, kind: FailureKind, message: String) {
        warn!(stage = %self.stage(), kind = %kind, error = %message, "Run failed");
        self.state.send_if_modified(|state| state.fail(kind, message));
    }
}

struct Shared {
    template: PlanTemplate,
    store: Arc<ArtifactStore>,
    parser: ResultParser,
    runner: Arc<dyn EngineRunner>,
    runs_config: RunConfig,
    slots: Arc<Semaphore>,
    runs: DashMap<RunIdentity, RunEntry>,
}

/// Entry point for callers: start, observe and cancel runs.
///
/// Cheap to clone; clones share the same runs and limits.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    /// Create an orchestrator writing artifacts under `working_dir` and
    /// running the engine through `runner`
    pub fn new(
        working_dir: impl Into<PathBuf>,
        runs_config: RunConfig,
        runner: Arc<dyn EngineRunner>,
    ) -> Self {
        let store = Arc::new(ArtifactStore::new(working_dir));
        let template =
            PlanTemplate::default().with_default_ramp_up(runs_config.default_ramp_up_secs);
        let slots = Arc::new(Semaphore::new(runs_config.max_concurrent.max(1)));

        Self {
            shared: Arc::new(Shared {
                template,
                parser: ResultParser::new(store.clone()),
                store,
                runner,
                runs_config,
                slots,
                runs: DashMap::new(),
            }),
        }
    }

    /// Orchestrator running the configured engine binary
    pub fn from_config(config: &LoadsmithConfig) -> Self {
        Self::new(
            config.storage.working_dir.clone(),
            config.runs.clone(),
            Arc::new(ProcessRunner::from_config(&config.engine)),
        )
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.shared.store
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.runs_config.max_concurrent.max(1)
    }

    /// Start a run under a freshly generated identity. Returns immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_run(&self, spec: TestSpec) -> Result<RunIdentity> {
        let identity = RunIdentity::generate(&spec.domain);
        self.start_run_with_identity(identity.clone(), spec)?;
        Ok(identity)
    }

    /// Start a run under a caller-chosen identity.
    ///
    /// An identity whose previous run is terminal may be reused; its state is
    /// replaced and its artifacts are rewritten from scratch.
    pub fn start_run_with_identity(&self, identity: RunIdentity, spec: TestSpec) -> Result<()> {
        let (sender, _) = watch::channel(RunState::new(identity.clone(), spec.clone()));
        let state = Arc::new(sender);
        let cancel = CancellationToken::new();
        let entry = RunEntry {
            state: state.clone(),
            cancel: cancel.clone(),
        };

        match self.shared.runs.entry(identity.clone()) {
            Entry::Occupied(mut existing) => {
                let stage = existing.get().snapshot().stage;
                if !stage.is_terminal() {
                    warn!(
                        run_id = %identity,
                        stage = %stage,
                        "Rejected run for an active identity"
                    );
                    return Err(PipelineError::Conflict(identity));
                }
                existing.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        info!(
            run_id = %identity,
            target = %spec.target_url(),
            threads = spec.threads,
            duration_secs = spec.duration_secs,
            method = %spec.method,
            "Run accepted"
        );

        let span = info_span!("run", run_id = %identity);
        let shared = self.shared.clone();
        tokio::spawn(
            async move {
                shared
                    .drive(identity, spec, RunTracker { state }, cancel)
                    .await
            }
            .instrument(span),
        );
        Ok(())
    }

    /// Snapshot of a run's current state
    pub fn status(&self, identity: &RunIdentity) -> Result<RunState> {
        self.shared
            .runs
            .get(identity)
            .map(|entry| entry.snapshot())
            .ok_or_else(|| PipelineError::NotFound(identity.clone()))
    }

    /// Metrics of a run that reached `Complete`
    pub fn summary(&self, identity: &RunIdentity) -> Result<MetricsSummary> {
        let state = self.status(identity)?;
        match (state.stage, state.summary) {
            (RunStage::Complete, Some(summary)) => Ok(summary),
            (stage, _) => Err(PipelineError::NotComplete {
                identity: identity.clone(),
                stage,
            }),
        }
    }

    /// Request cancellation. Returns `false` when the request is a no-op
    /// because the run is past execution.
    pub fn cancel(&self, identity: &RunIdentity) -> Result<bool> {
        let entry = self
            .shared
            .runs
            .get(identity)
            .ok_or_else(|| PipelineError::NotFound(identity.clone()))?;
        let stage = entry.snapshot().stage;

        match stage {
            RunStage::Created | RunStage::Rendering | RunStage::Rendered | RunStage::Executing => {
                entry.cancel.cancel();
                info!(run_id = %identity, stage = %stage, "Cancellation requested");
                Ok(true)
            }
            _ => {
                debug!(run_id = %identity, stage = %stage, "Cancellation ignored");
                Ok(false)
            }
        }
    }

    /// Resolve once the run is terminal, returning its final state
    pub async fn wait(&self, identity: &RunIdentity) -> Result<RunState> {
        let mut updates = self
            .shared
            .runs
            .get(identity)
            .map(|entry| entry.state.subscribe())
            .ok_or_else(|| PipelineError::NotFound(identity.clone()))?;

        if let Ok(state) = updates.wait_for(RunState::is_terminal).await {
            return Ok(state.clone());
        }
        let state = updates.borrow().clone();
        Ok(state)
    }

    /// Drop a terminal run from the registry, returning its final state
    pub fn remove(&self, identity: &RunIdentity) -> Result<RunState> {
        match self.shared.runs.entry(identity.clone()) {
            Entry::Vacant(_) => Err(PipelineError::NotFound(identity.clone())),
            Entry::Occupied(existing) => {
                if !existing.get().snapshot().is_terminal() {
                    return Err(PipelineError::Conflict(identity.clone()));
                }
                let state = existing.remove().snapshot();
                Ok(state)
            }
        }
    }

    /// Snapshots of every known run
    pub fn runs(&self) -> Vec<RunState> {
        self.shared
            .runs
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }
}

impl Shared {
    async fn drive(
        self: Arc<Self>,
        identity: RunIdentity,
        spec: TestSpec,
        run: RunTracker,
        cancel: CancellationToken,
    ) {
        let started = Instant::now();

        if let Some(paths) = self.render_stage(&identity, &spec, &run).await {
            if self.execute_stage(&spec, &paths, &run, &cancel).await {
                self.parse_stage(&paths, &run).await;
            }
        }

        info!(
            stage = %run.stage(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run finished"
        );
    }

    /// Created -> Rendering -> Rendered
    async fn render_stage(
        &self,
        identity: &RunIdentity,
        spec: &TestSpec,
        run: &RunTracker,
    ) -> Option<ArtifactPaths> {
        run.advance(RunStage::Rendering);

        let plan = match self.template.render(spec, identity) {
            Ok(plan) => plan,
            Err(e) => {
                run.fail(FailureKind::Template, e.to_string());
                return None;
            }
        };

        let paths = match retry_once("allocate", || self.store.allocate(identity)).await {
            Ok(paths) => paths,
            Err(e) => {
                run.fail(FailureKind::Storage, e.to_string());
                return None;
            }
        };
        run.update(|state| state.artifacts = Some(paths.clone()));

        let persisted = async {
            retry_once("write plan", || self.store.write(&paths.plan, plan.as_bytes())).await?;
            // A previous attempt's results must never be read as this run's
            retry_once("clear outputs", || self.store.clear_outputs(&paths)).await
        }
        .await;
        if let Err(e) = persisted {
            run.fail(FailureKind::Storage, e.to_string());
            return None;
        }

        debug!(plan = %paths.plan.display(), "Plan written");
        run.advance(RunStage::Rendered);
        Some(paths)
    }

    /// Rendered -> Executing -> Executed. Returns whether the run continues.
    async fn execute_stage(
        &self,
        spec: &TestSpec,
        paths: &ArtifactPaths,
        run: &RunTracker,
        cancel: &CancellationToken,
    ) -> bool {
        run.advance(RunStage::Executing);

        if cancel.is_cancelled() {
            info!("Cancelled before the engine started");
            run.advance(RunStage::Cancelled);
            return false;
        }

        if self.slots.available_permits() == 0 {
            debug!("Waiting for an execution slot");
        }
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Cancelled while waiting for an execution slot");
                run.advance(RunStage::Cancelled);
                return false;
            }
            acquired = self.slots.clone().acquire_owned() => match acquired {
                Ok(permit) => permit,
                Err(e) => {
                    run.fail(
                        FailureKind::Internal,
                        format!("no execution slot available: {e}"),
                    );
                    return false;
                }
            },
        };

        let ramp_up = spec.effective_ramp_up(self.runs_config.default_ramp_up_secs);
        let timeout = self.runs_config.timeout_for(ramp_up, spec.duration_secs);
        let command = EngineCommand::from(paths);

        let execution = self.runner.execute(&command, timeout, cancel.clone()).await;
        drop(permit);

        let status = execution.status;
        let error = execution.error();
        run.update(|state| state.execution = Some(execution));

        match status {
            ExecutionStatus::Success => run.advance(RunStage::Executed),
            ExecutionStatus::Cancelled => {
                run.advance(RunStage::Cancelled);
                false
            }
            status => {
                let message = error.map(|e| e.to_string()).unwrap_or_default();
                run.fail(FailureKind::Process { status }, message);
                false
            }
        }
    }

    /// Executed -> Parsing -> Complete
    async fn parse_stage(&self, paths: &ArtifactPaths, run: &RunTracker) {
        run.advance(RunStage::Parsing);

        let parsed = retry_once("parse results", || self.parser.parse(&paths.results)).await;
        let summary = match parsed {
            Ok(summary) => summary,
            Err(e) => {
                run.fail(FailureKind::Storage, e.to_string());
                return;
            }
        };

        let missing = summary
            .malformed
            .as_ref()
            .filter(|reason| reason.is_io())
            .map(|reason| format!("{reason}: {}", paths.results.display()));
        run.update(|state| state.summary = Some(summary));

        match missing {
            Some(message) => run.fail(FailureKind::Parse, message),
            None => {
                run.advance(RunStage::Complete);
            }
        }
    }
}

/// Run a storage operation, retrying it once if the first failure is transient
async fn retry_once<T, F, Fut>(operation: &'static str, mut op: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            warn!(operation, error = %e, "Transient storage error, retrying once");
            op().await
        }
        other => other,
    }
}
