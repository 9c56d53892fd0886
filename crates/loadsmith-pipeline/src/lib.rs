//! Run Orchestration Layer
//!
//! This crate owns everything that has a lifetime longer than a function
//! call: the engine child process and the per-run state machine.
//!
//! ## Architecture
//!
//! - [`ProcessRunner`]: launches the engine, enforces timeout and
//!   cancellation, and classifies how the process ended
//! - [`Orchestrator`]: sequences Render -> Execute -> Parse for each run,
//!   bounds concurrent executions and records every outcome on the run
//!
//! Rendering, storage and parsing live in `loadsmith-core`; this crate only
//! coordinates them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use loadsmith_pipeline::Orchestrator;
//!
//! let orchestrator = Orchestrator::from_config(&config);
//! let run_id = orchestrator.start_run(spec)?;
//! let finished = orchestrator.wait(&run_id).await?;
//! println!("{}", finished.diagnostic());
//! ```

pub mod error;
pub mod orchestrator;
pub mod runner;

pub use error::{PipelineError, Result};
pub use orchestrator::Orchestrator;
pub use runner::{EngineCommand, EngineRunner, ProcessRunner, CSV_OUTPUT_PROPERTY};
