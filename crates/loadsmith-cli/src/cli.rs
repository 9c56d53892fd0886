use clap::{Args, Parser, Subcommand, ValueEnum};
use loadsmith_core::HttpMethod;
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Log level options for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    Off,
    /// Error messages only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages, including stage changes
    Info,
    /// Debug messages
    Debug,
    /// Trace-level messages (most verbose)
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Parser)]
#[command(name = "loadsmith")]
#[command(about = "loadsmith - render, run and summarize JMeter load tests")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set log level (off, error, warn, info, debug, trace).
    /// If not specified, uses RUST_LOG or defaults to 'warn'
    #[arg(short = 'l', long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Enable verbose logging (shortcut for --log-level=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path (defaults to ~/.config/loadsmith/config.toml)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Engine executable (overrides config file and LOADSMITH_ENGINE)
    #[arg(long, global = true)]
    pub engine: Option<PathBuf>,

    /// Directory for plans, results and engine logs (overrides config file)
    #[arg(long, global = true)]
    pub working_dir: Option<PathBuf>,
}

impl Cli {
    /// Level requested on the command line, if any
    pub fn requested_level(&self) -> Option<LevelFilter> {
        match (self.log_level, self.verbose) {
            (Some(level), _) => Some(level.into()),
            (None, true) => Some(LevelFilter::DEBUG),
            (None, false) => None,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a plan, run the engine against it and summarize the results.
    ///
    /// Ctrl-C cancels the run and terminates the engine.
    Run {
        #[command(flatten)]
        load: LoadArgs,

        /// Per-run timeout in seconds (default: ramp-up + duration + startup allowance)
        #[arg(long)]
        timeout: Option<u64>,

        /// Print the final run state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render a plan without running it
    Render {
        #[command(flatten)]
        load: LoadArgs,

        /// Write the plan here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Run identity to embed (generated if omitted)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Summarize an existing CSV result file
    Parse {
        /// Result file (.jtl) written by the engine
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Target and load profile shared by `run` and `render`
#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Target URL or host, e.g. https://example.com/api
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Concurrent users
    #[arg(short, long, default_value_t = 1)]
    pub threads: u32,

    /// Test duration in seconds, excluding ramp-up
    #[arg(short, long)]
    pub duration: u32,

    /// Seconds over which users are started (default from config)
    #[arg(short, long)]
    pub ramp_up: Option<u32>,

    /// HTTP method (GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS)
    #[arg(short, long, default_value = "GET")]
    pub method: HttpMethod,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize a new config file
    Init {
        /// Path for the config file (defaults to ~/.config/loadsmith/config.toml)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite existing config file
        #[arg(short = 'F', long)]
        force: bool,
    },

    /// Show the current effective configuration
    Show {
        /// Output format (toml, json)
        #[arg(short = 'f', long, default_value = "toml")]
        format: String,
    },
}
