//! Process Runner
//!
//! Launches the load engine in non-GUI mode against one plan and turns however
//! the process ends into an [`ExecutionResult`]. The result file is never
//! inspected here.
//!
//! Invocation shape (arguments are passed directly, never through a shell):
//!
//! ```text
//! <engine> -n -t <plan> -l <results> -j <log> -Jjmeter.save.saveservice.output_format=csv [extra args...]
//! ```

use async_trait::async_trait;
use chrono::Utc;
use loadsmith_config::EngineConfig;
use loadsmith_core::{ArtifactPaths, ExecutionResult, ExecutionStatus};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Forces the tabular result format regardless of the engine's local defaults
pub const CSV_OUTPUT_PROPERTY: &str = "-Jjmeter.save.saveservice.output_format=csv";

/// Captured stderr beyond this is dropped
const MAX_DIAGNOSTIC_BYTES: usize = 256 * 1024;

/// How long to wait for stderr to close once the engine has exited
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Files handed to the engine for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub plan: PathBuf,
    pub results: PathBuf,
    pub log: PathBuf,
}

impl EngineCommand {
    pub fn new(
        plan: impl Into<PathBuf>,
        results: impl Into<PathBuf>,
        log: impl Into<PathBuf>,
    ) -> Self {
        Self {
            plan: plan.into(),
            results: results.into(),
            log: log.into(),
        }
    }
}

impl From<&ArtifactPaths> for EngineCommand {
    fn from(paths: &ArtifactPaths) -> Self {
        Self::new(&paths.plan, &paths.results, &paths.log)
    }
}

/// Something that can run the engine once
///
/// The orchestrator only talks to this trait, so tests can substitute an
/// in-process engine.
#[async_trait]
pub trait EngineRunner: Send + Sync {
    /// Run the engine to completion, timeout or cancellation.
    ///
    /// Never returns before the engine process has been reaped.
    async fn execute(
        &self,
        command: &EngineCommand,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> ExecutionResult;
}

enum Ended {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut,
    Cancelled,
}

/// Runs the real engine binary as a child process
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    engine: PathBuf,
    extra_args: Vec<String>,
    kill_grace: Duration,
}

impl ProcessRunner {
    pub fn new(engine: impl Into<PathBuf>) -> Self {
        Self {
            engine: engine.into(),
            extra_args: Vec::new(),
            kill_grace: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.path)
            .with_extra_args(config.extra_args.clone())
            .with_kill_grace(config.kill_grace())
    }

    /// Arguments appended after the fixed invocation
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Delay between the polite termination signal and the forced kill
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn engine(&self) -> &Path {
        &self.engine
    }

    /// Full argument vector passed to the engine for `command`
    pub fn arguments(&self, command: &EngineCommand) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-n".into(),
            "-t".into(),
            command.plan.clone().into_os_string(),
            "-l".into(),
            command.results.clone().into_os_string(),
            "-j".into(),
            command.log.clone().into_os_string(),
            CSV_OUTPUT_PROPERTY.into(),
        ];
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }

    fn command(&self, command: &EngineCommand) -> Command {
        let mut cmd = Command::new(&self.engine);
        cmd.args(self.arguments(command))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so termination reaches the engine's children too
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    /// Stop `child`: SIGTERM to its group, then SIGKILL after the grace
    /// period. Returns once the child has been reaped.
    async fn terminate(&self, child: &mut Child) -> Option<ExitStatus> {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            signal_group(pid, libc::SIGTERM);
            if let Ok(Ok(status)) = tokio::time::timeout(self.kill_grace, child.wait()).await {
                // Sweep anything left behind in the group
                signal_group(pid, libc::SIGKILL);
                return Some(status);
            }
            warn!(
                pid,
                grace_secs = self.kill_grace.as_secs(),
                "Engine ignored SIGTERM, killing process group"
            );
            signal_group(pid, libc::SIGKILL);
        }

        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Kill request not delivered");
        }
        match child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "Failed to reap engine process");
                None
            }
        }
    }
}

#[async_trait]
impl EngineRunner for ProcessRunner {
    async fn execute(
        &self,
        command: &EngineCommand,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let engine = self.engine.display().to_string();
        let finish = |status: ExecutionStatus,
                      exit_code: Option<i32>,
                      pid: Option<u32>,
                      diagnostics: String| ExecutionResult {
            status,
            exit_code,
            result_path: command.results.clone(),
            diagnostics,
            engine: engine.clone(),
            pid,
            timeout,
            started_at,
            finished_at: Utc::now(),
        };

        let mut child = match self.command(command).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(engine = %engine, error = %e, "Failed to launch engine");
                return finish(ExecutionStatus::SpawnFailed, None, None, e.to_string());
            }
        };
        let pid = child.id();
        info!(
            engine = %engine,
            pid = ?pid,
            plan = %command.plan.display(),
            timeout_secs = timeout.as_secs(),
            "Engine started"
        );

        let stderr = child.stderr.take();
        let mut stderr_task = tokio::spawn(async move {
            match stderr {
                Some(stream) => read_capped(stream).await,
                None => String::new(),
            }
        });

        let ended = tokio::select! {
            biased;
            _ = cancel.cancelled() => Ended::Cancelled,
            waited = tokio::time::timeout(timeout, child.wait()) => match waited {
                Ok(Ok(status)) => Ended::Exited(status),
                Ok(Err(e)) => Ended::WaitFailed(e),
                Err(_) => Ended::TimedOut,
            },
        };

        let (status, exit_code) = match ended {
            Ended::Exited(status) if status.success() => (ExecutionStatus::Success, status.code()),
            Ended::Exited(status) => (ExecutionStatus::NonZeroExit, status.code()),
            Ended::WaitFailed(e) => {
                warn!(pid = ?pid, error = %e, "Lost track of engine process");
                let exit = self.terminate(&mut child).await;
                (ExecutionStatus::NonZeroExit, exit.and_then(|s| s.code()))
            }
            Ended::TimedOut => {
                warn!(
                    pid = ?pid,
                    timeout_secs = timeout.as_secs(),
                    "Engine timed out, terminating"
                );
                let exit = self.terminate(&mut child).await;
                (ExecutionStatus::TimedOut, exit.and_then(|s| s.code()))
            }
            Ended::Cancelled => {
                info!(pid = ?pid, "Engine run cancelled, terminating");
                let exit = self.terminate(&mut child).await;
                (ExecutionStatus::Cancelled, exit.and_then(|s| s.code()))
            }
        };

        let diagnostics = match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut stderr_task).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                debug!(error = %e, "Stderr reader failed");
                String::new()
            }
            Err(_) => {
                stderr_task.abort();
                debug!("Stderr still open after engine exit, giving up on it");
                String::new()
            }
        };

        let result = finish(status, exit_code, pid, diagnostics);
        info!(
            pid = ?pid,
            status = %result.status,
            exit_code = ?result.exit_code,
            elapsed_ms = result.elapsed().num_milliseconds(),
            "Engine finished"
        );
        result
    }
}

async fn read_capped(mut stream: impl tokio::io::AsyncRead + Unpin) -> String {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut dropped = 0usize;
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = MAX_DIAGNOSTIC_BYTES.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
                dropped += n.saturating_sub(room);
            }
            Err(e) => {
                debug!(error = %e, "Stderr read failed");
                break;
            }
        }
    }
    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if dropped > 0 {
        text.push_str(&format!("\n... ({dropped} bytes of stderr omitted)"));
    }
    text
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group the engine leads.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc != 0 {
        debug!(
            pgid,
            signal,
            error = %std::io::Error::last_os_error(),
            "Process group signal not delivered"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_shape_is_fixed() {
        let runner = ProcessRunner::new("jmeter").with_extra_args(vec!["-Jfoo=bar".into()]);
        let command = EngineCommand::new(
            "/work/my runs/a.jmx",
            "/work/my runs/a.jtl",
            "/work/my runs/a.log",
        );

        let args: Vec<String> = runner
            .arguments(&command)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "-n",
                "-t",
                "/work/my runs/a.jmx",
                "-l",
                "/work/my runs/a.jtl",
                "-j",
                "/work/my runs/a.log",
                CSV_OUTPUT_PROPERTY,
                "-Jfoo=bar",
            ]
        );
    }

    #[test]
    fn from_config_carries_engine_settings() {
        let config = EngineConfig {
            path: PathBuf::from("/opt/jmeter/bin/jmeter"),
            extra_args: vec!["-Jx=1".into()],
            kill_grace_secs: 9,
        };
        let runner = ProcessRunner::from_config(&config);
        assert_eq!(runner.engine(), Path::new("/opt/jmeter/bin/jmeter"));
        assert_eq!(runner.kill_grace, Duration::from_secs(9));
        assert_eq!(runner.extra_args, vec!["-Jx=1".to_string()]);
    }

    #[tokio::test]
    async fn stderr_capture_is_capped() {
        let big = vec![b'x'; MAX_DIAGNOSTIC_BYTES + 10];
        let text = read_capped(&big[..]).await;
        assert!(text.starts_with("xxx"));
        assert!(text.ends_with("(10 bytes of stderr omitted)"));
    }
}
