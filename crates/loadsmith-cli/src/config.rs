//! Effective configuration for one invocation
//!
//! defaults < config file < environment < command-line flags

use anyhow::{Context, Result};
use loadsmith_config::LoadsmithConfig;
use tracing::debug;

use crate::cli::Cli;

/// Load the config file and environment, then apply global CLI overrides
pub fn load(cli: &Cli) -> Result<LoadsmithConfig> {
    let mut config =
        LoadsmithConfig::load(cli.config.clone()).context("Failed to load configuration")?;
    apply_overrides(&mut config, cli);
    config.validate().context("Invalid configuration")?;
    debug!(
        engine = %config.engine.path.display(),
        working_dir = %config.storage.working_dir.display(),
        max_concurrent = config.runs.max_concurrent,
        "Configuration loaded"
    );
    Ok(config)
}

/// Apply the global flags that shadow config values
pub fn apply_overrides(config: &mut LoadsmithConfig, cli: &Cli) {
    if let Some(engine) = &cli.engine {
        config.engine.path = engine.clone();
    }
    if let Some(dir) = &cli.working_dir {
        config.storage.working_dir = dir.clone();
    }
}
