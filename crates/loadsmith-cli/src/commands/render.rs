use anyhow::{Context, Result};
use colored::Colorize;
use loadsmith_config::LoadsmithConfig;
use loadsmith_core::{PlanTemplate, RunIdentity};
use std::path::PathBuf;

use crate::cli::LoadArgs;
use crate::commands::run::build_spec;

/// Render a plan for inspection without running the engine
pub async fn execute(
    config: LoadsmithConfig,
    load: LoadArgs,
    output: Option<PathBuf>,
    run_id: Option<String>,
) -> Result<()> {
    let spec = build_spec(&load)?;
    let identity = match run_id {
        Some(token) => RunIdentity::from_token(token).context("Run identity must not be empty")?,
        None => RunIdentity::generate(&spec.domain),
    };

    let plan = PlanTemplate::default()
        .with_default_ramp_up(config.runs.default_ramp_up_secs)
        .render(&spec, &identity)
        .context("Failed to render plan")?;

    match output {
        Some(path) => {
            std::fs::write(&path, plan.as_bytes())
                .with_context(|| format!("Failed to write plan to {}", path.display()))?;
            eprintln!(
                "{} Rendered plan for run {} to {}",
                "Success:".green().bold(),
                identity,
                path.display()
            );
        }
        None => print!("{}", plan.content()),
    }
    Ok(())
}
