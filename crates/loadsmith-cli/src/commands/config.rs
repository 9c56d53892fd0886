use anyhow::{Context, Result};
use colored::Colorize;
use loadsmith_config::LoadsmithConfig;
use std::path::PathBuf;

/// Initialize a new config file
pub async fn init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = path
        .or_else(LoadsmithConfig::default_config_path)
        .context("Could not determine config file path")?;

    if config_path.exists() && !force {
        println!(
            "{} Config file already exists at: {}",
            "Error:".red().bold(),
            config_path.display()
        );
        println!("Use {} to overwrite", "--force".yellow());
        return Ok(());
    }

    LoadsmithConfig::default()
        .create_example(&config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!(
        "{} Created config file at: {}",
        "Success:".green().bold(),
        config_path.display()
    );
    println!(
        "\n{}",
        "Set engine.path to your JMeter executable before running tests.".dimmed()
    );

    Ok(())
}

/// Show the current effective configuration
pub async fn show(config: &LoadsmithConfig, format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(config)?),
        "toml" => println!("{}", config.to_toml()?),
        other => anyhow::bail!("Unknown format '{other}' (expected toml or json)"),
    }
    Ok(())
}
