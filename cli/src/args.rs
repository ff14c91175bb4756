//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Supertask - run a single-flow task queue from a plan file.
#[derive(Debug, Parser)]
#[command(name = "supertask")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides ~/.supertask/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the steps of a plan and accept control commands on stdin
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Plan file with `[[steps]]` entries
    pub plan: PathBuf,

    /// Start executing without waiting for `resume`
    #[arg(long)]
    pub immediate: bool,
}
