//! # loadsmith configuration
//!
//! Typed configuration for the load-test pipeline: where the engine lives,
//! how runs are bounded, and where artifacts are written.
//!
//! ## Precedence
//!
//! defaults < config file < environment < command-line overrides
//!
//! ```rust,no_run
//! use loadsmith_config::LoadsmithConfig;
//!
//! let config = LoadsmithConfig::load(None)?;
//! println!("engine: {}", config.engine.path.display());
//! # Ok::<(), loadsmith_config::ConfigError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod loader;

pub use config::*;
pub use loader::*;
