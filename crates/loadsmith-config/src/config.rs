//! Configuration sections

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for loadsmith
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadsmithConfig {
    /// Load-generation engine settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Per-run defaults and limits
    #[serde(default)]
    pub runs: RunConfig,
    /// Artifact storage settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Engine (JMeter) invocation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the engine executable, or a bare name resolved through `PATH`
    #[serde(default = "default_engine_path")]
    pub path: PathBuf,
    /// Extra arguments appended verbatim to every invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Seconds between the polite termination request and a forced kill
    #[serde(default = "default_kill_grace")]
    pub kill_grace_secs: u64,
}

fn default_engine_path() -> PathBuf {
    PathBuf::from("jmeter")
}
fn default_kill_grace() -> u64 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: default_engine_path(),
            extra_args: Vec::new(),
            kill_grace_secs: default_kill_grace(),
        }
    }
}

impl EngineConfig {
    /// Termination grace period as a [`Duration`]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

/// Run scheduling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Ramp-up applied when a test spec does not carry its own
    #[serde(default)]
    pub default_ramp_up_secs: u32,
    /// Fixed per-run timeout. When unset the timeout is derived from the
    /// scheduled load profile plus `startup_allowance_secs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Slack added to ramp-up + duration for engine startup and shutdown
    #[serde(default = "default_startup_allowance")]
    pub startup_allowance_secs: u64,
    /// Maximum number of engine processes running at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_startup_allowance() -> u64 {
    60
}
fn default_max_concurrent() -> usize {
    2
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_ramp_up_secs: 0,
            timeout_secs: None,
            startup_allowance_secs: default_startup_allowance(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl RunConfig {
    /// Timeout for a run whose load profile lasts `ramp_up + duration` seconds
    pub fn timeout_for(&self, ramp_up_secs: u32, duration_secs: u32) -> Duration {
        match self.timeout_secs {
            Some(fixed) => Duration::from_secs(fixed),
            None => Duration::from_secs(
                u64::from(ramp_up_secs) + u64::from(duration_secs) + self.startup_allowance_secs,
            ),
        }
    }
}

/// Artifact storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding generated plans, result files and engine logs
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
}

fn default_working_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("loadsmith")
        .join("runs")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
        }
    }
}
