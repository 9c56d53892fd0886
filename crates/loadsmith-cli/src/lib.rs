//! loadsmith command-line front end
//!
//! The binary is a deterministic caller of the orchestrator: it builds a
//! test spec from arguments, starts one run and reports how it ended.

pub mod cli;
pub mod commands;
pub mod config;
pub mod output;
