use anyhow::{bail, Context, Result};
use colored::Colorize;
use loadsmith_config::LoadsmithConfig;
use loadsmith_core::{RunStage, TestSpec};
use loadsmith_pipeline::Orchestrator;
use tracing::{debug, info};

use crate::cli::LoadArgs;
use crate::output;

/// Turn command-line load arguments into a test spec
pub fn build_spec(load: &LoadArgs) -> Result<TestSpec> {
    let spec = TestSpec::new(&load.target, load.threads, load.duration, load.method)
        .with_context(|| format!("Invalid target '{}'", load.target))?;
    Ok(match load.ramp_up {
        Some(secs) => spec.with_ramp_up(secs),
        None => spec,
    })
}

/// Run one load test end to end. Ctrl-C cancels it.
pub async fn execute(
    mut config: LoadsmithConfig,
    load: LoadArgs,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    if timeout.is_some() {
        config.runs.timeout_secs = timeout;
    }
    let spec = build_spec(&load)?;

    let orchestrator = Orchestrator::from_config(&config);
    let identity = orchestrator.start_run(spec)?;
    info!(run_id = %identity, engine = %config.engine.path.display(), "Run started");
    if !json {
        eprintln!("{} {}", "Started run".cyan().bold(), identity);
    }

    let state = tokio::select! {
        state = orchestrator.wait(&identity) => state?,
        Ok(()) = tokio::signal::ctrl_c() => {
            eprintln!("{}", "Interrupted, cancelling run...".yellow());
            let cancelled = orchestrator.cancel(&identity)?;
            debug!(run_id = %identity, cancelled, "Cancel requested");
            orchestrator.wait(&identity).await?
        }
    };

    if json {
        output::print_json(&state)?;
    } else {
        print!("{}", output::format_run(&state));
    }

    if state.stage != RunStage::Complete {
        bail!("{}", state.diagnostic());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use loadsmith_core::{HttpMethod, Protocol};

    fn load_args(args: &[&str]) -> LoadArgs {
        let cli = Cli::parse_from(["loadsmith", "run"].iter().chain(args).copied());
        match cli.command {
            Commands::Run { load, .. } => load,
            _ => unreachable!("parsed a run command"),
        }
    }

    #[test]
    fn spec_is_built_from_flags() {
        let spec = build_spec(&load_args(&[
            "http://example.com:8080/api/",
            "-t",
            "10",
            "-d",
            "60",
            "-r",
            "5",
            "-m",
            "post",
        ]))
        .unwrap();

        assert_eq!(spec.domain, "example.com");
        assert_eq!(spec.port, Some(8080));
        assert_eq!(spec.protocol, Protocol::Http);
        assert_eq!(spec.threads, 10);
        assert_eq!(spec.duration_secs, 60);
        assert_eq!(spec.ramp_up_secs, Some(5));
        assert_eq!(spec.method, HttpMethod::Post);
    }

    #[test]
    fn ramp_up_defaults_to_unset() {
        let spec = build_spec(&load_args(&["example.com", "-d", "30"])).unwrap();
        assert_eq!(spec.threads, 1);
        assert_eq!(spec.ramp_up_secs, None);
        assert_eq!(spec.method, HttpMethod::Get);
    }

    #[test]
    fn unknown_method_is_rejected_by_the_parser() {
        let parsed =
            Cli::try_parse_from(["loadsmith", "run", "example.com", "-d", "5", "-m", "BREW"]);
        assert!(parsed.is_err());
    }
}
