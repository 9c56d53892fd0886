use anyhow::{Context, Result};
use colored::Colorize;
use loadsmith_core::{MalformedReason, MetricsSummary, ResultParser};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::PathBuf;

use crate::output;

/// Summarize a result file written by an earlier engine run.
///
/// A missing file is reported as a `MALFORMED` summary, not an error.
pub async fn execute(file: PathBuf, json: bool) -> Result<()> {
    let summary = match File::open(&file) {
        Ok(opened) => ResultParser::summarize(BufReader::new(opened))
            .with_context(|| format!("Failed to read result file {}", file.display()))?,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            MetricsSummary::malformed(MalformedReason::Missing)
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to open result file {}", file.display()))
        }
    };

    if json {
        output::print_json(&summary)?;
    } else {
        println!("{} {}", "Results:".bold(), file.display());
        print!("{}", output::format_summary(&summary));
    }
    Ok(())
}
