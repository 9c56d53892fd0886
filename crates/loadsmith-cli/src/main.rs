use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use loadsmith_cli::{
    cli::{Cli, Commands, ConfigCommands},
    commands, config,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging: --log-level / --verbose, then RUST_LOG, then warn
    let env_filter = match cli.requested_level() {
        Some(level) => EnvFilter::new(
            ["loadsmith_cli", "loadsmith_pipeline", "loadsmith_core", "loadsmith_config"]
                .map(|target| format!("{target}={level}"))
                .join(","),
        ),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    // Not propagated yet: `config init` has to work when the current config is broken
    let loaded = config::load(&cli);

    match cli.command {
        Commands::Run {
            load,
            timeout,
            json,
        } => commands::run::execute(loaded?, load, timeout, json).await?,

        Commands::Render {
            load,
            output,
            run_id,
        } => commands::render::execute(loaded?, load, output, run_id).await?,

        Commands::Parse { file, json } => commands::parse::execute(file, json).await?,

        Commands::Config(ConfigCommands::Init { path, force }) => {
            commands::config::init(path, force).await?
        }

        Commands::Config(ConfigCommands::Show { format }) => {
            commands::config::show(&loaded?, &format).await?
        }
    }

    Ok(())
}
