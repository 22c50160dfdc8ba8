//! # Run Command Implementation
//!
//! Resolves all requests in a LaTeX `.aux` file and appends the resulting
//! macro definitions, so that the next LaTeX pass can include the files.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use log::info;

use texgit::defaults::{DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_REPO_DIR};
use texgit::exec::ExecEnvironment;
use texgit::metadata;

/// Resolve the requests in a LaTeX .aux file
#[derive(Args, Debug)]
pub struct RunArgs {
    /// The .aux file to process (the extension may be omitted)
    #[arg(value_name = "AUX")]
    pub aux: PathBuf,

    /// Cache directory, relative to the directory of the .aux file
    #[arg(
        long,
        value_name = "DIR",
        env = "TEXGIT_REPO_DIR",
        default_value = DEFAULT_REPO_DIR
    )]
    pub repo_dir: PathBuf,

    /// Timeout for each executed command, in seconds
    #[arg(
        long,
        value_name = "SECS",
        env = "TEXGIT_TIMEOUT",
        default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,
}

/// Execute the `run` command.
pub fn execute(args: RunArgs) -> Result<()> {
    let environment = ExecEnvironment::from_process(Duration::from_secs(args.timeout));
    let summary = metadata::run(&args.aux, &args.repo_dir, &environment)
        .with_context(|| format!("Failed to process {}", args.aux.display()))?;

    info!(
        "All done: {} request(s) resolved, {} line(s) appended, {} line(s) deleted",
        summary.resolved, summary.appended, summary.deleted
    );
    Ok(())
}
