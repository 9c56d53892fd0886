#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use loadsmith_config::RunConfig;
use loadsmith_core::{ExecutionResult, ExecutionStatus};
use loadsmith_pipeline::{EngineCommand, EngineRunner, Orchestrator};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Header the engine writes in CSV mode
pub const JTL_HEADER: &str =
    "timeStamp,elapsed,label,responseCode,responseMessage,threadName,dataType,success,bytes,Latency";

/// Build a result file from `(elapsed_ms, success)` samples
pub fn jtl(samples: &[(u64, bool)]) -> String {
    let mut out = format!("{JTL_HEADER}\n");
    for (i, (elapsed, success)) in samples.iter().enumerate() {
        let code = if *success { "200" } else { "500" };
        out.push_str(&format!(
            "{},{elapsed},HTTP Request,{code},OK,Thread Group 1-1,text,{success},512,{elapsed}\n",
            1_700_000_000_000u64 + i as u64 * 100
        ));
    }
    out
}

/// What the fake engine does for one invocation
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Write these samples and exit 0
    Samples(Vec<(u64, bool)>),
    /// Write only the header and exit 0
    HeaderOnly,
    /// Write a file without the required columns and exit 0
    WrongHeader,
    /// Exit 0 without writing anything
    NoResults,
    /// Exit with `code`, printing `stderr`
    Exit { code: i32, stderr: String },
    /// Never finish on its own
    Hang,
}

/// In-process stand-in for the engine binary
pub struct FakeEngine {
    behaviors: Vec<FakeBehavior>,
    hold: Duration,
    invocations: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    saw_stale_results: AtomicBool,
    commands: Mutex<Vec<EngineCommand>>,
    pub started: Notify,
}

impl FakeEngine {
    pub fn new(behavior: FakeBehavior) -> Arc<Self> {
        Self::sequence(vec![behavior])
    }

    /// Invocation `n` uses `behaviors[n]`; the last entry repeats
    pub fn sequence(behaviors: Vec<FakeBehavior>) -> Arc<Self> {
        Self::build(behaviors, Duration::ZERO)
    }

    /// Keep every invocation busy for `hold` before finishing
    pub fn holding(behavior: FakeBehavior, hold: Duration) -> Arc<Self> {
        Self::build(vec![behavior], hold)
    }

    fn build(behaviors: Vec<FakeBehavior>, hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            behaviors,
            hold,
            invocations: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            saw_stale_results: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
            started: Notify::new(),
        })
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Whether any invocation started with a result file already present
    pub fn saw_stale_results(&self) -> bool {
        self.saw_stale_results.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<EngineCommand> {
        self.commands.lock().unwrap().clone()
    }

    fn behavior(&self, n: usize) -> FakeBehavior {
        self.behaviors
            .get(n)
            .or_else(|| self.behaviors.last())
            .cloned()
            .unwrap_or(FakeBehavior::NoResults)
    }
}

#[async_trait]
impl EngineRunner for FakeEngine {
    async fn execute(
        &self,
        command: &EngineCommand,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let n = self.invocations.fetch_add(1, Ordering::SeqCst);
        let now_running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        if command.results.exists() {
            self.saw_stale_results.store(true, Ordering::SeqCst);
        }
        self.commands.lock().unwrap().push(command.clone());
        self.started.notify_one();

        let behavior = self.behavior(n);
        let wait = match behavior {
            FakeBehavior::Hang => timeout,
            _ => self.hold,
        };

        let interrupted = tokio::select! {
            _ = cancel.cancelled() => Some(ExecutionStatus::Cancelled),
            _ = tokio::time::sleep(wait) => match behavior {
                FakeBehavior::Hang => Some(ExecutionStatus::TimedOut),
                _ => None,
            },
        };

        let (status, exit_code, diagnostics) = match (interrupted, behavior) {
            (Some(status), _) => (status, None, String::new()),
            (None, FakeBehavior::Samples(samples)) => {
                std::fs::write(&command.results, jtl(&samples)).unwrap();
                (ExecutionStatus::Success, Some(0), String::new())
            }
            (None, FakeBehavior::HeaderOnly) => {
                std::fs::write(&command.results, format!("{JTL_HEADER}\n")).unwrap();
                (ExecutionStatus::Success, Some(0), String::new())
            }
            (None, FakeBehavior::WrongHeader) => {
                std::fs::write(&command.results, "when,what\n1,2\n").unwrap();
                (ExecutionStatus::Success, Some(0), String::new())
            }
            (None, FakeBehavior::NoResults) => (ExecutionStatus::Success, Some(0), String::new()),
            (None, FakeBehavior::Exit { code, stderr }) => {
                (ExecutionStatus::NonZeroExit, Some(code), stderr)
            }
            (None, FakeBehavior::Hang) => unreachable!("hang always ends interrupted"),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        ExecutionResult {
            status,
            exit_code,
            result_path: command.results.clone(),
            diagnostics,
            engine: "fake-jmeter".into(),
            pid: None,
            timeout,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Temporary working area plus an orchestrator over it
pub struct TestPipeline {
    pub temp_dir: TempDir,
    pub working_dir: PathBuf,
    pub orchestrator: Orchestrator,
}

impl TestPipeline {
    pub fn new(engine: Arc<dyn EngineRunner>) -> Result<Self> {
        Self::with_config(engine, RunConfig::default())
    }

    pub fn with_config(engine: Arc<dyn EngineRunner>, runs: RunConfig) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let working_dir = temp_dir.path().join("runs");
        let orchestrator = Orchestrator::new(working_dir.clone(), runs, engine);
        Ok(Self {
            temp_dir,
            working_dir,
            orchestrator,
        })
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

/// Write an executable shell script standing in for the engine binary
#[cfg(unix)]
pub fn fake_engine_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Whether `pid` still names a process in the process table
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Poll `check` until it holds or `limit` elapses
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
