//! Supertask CLI - drives a task queue from a plan file and stdin.
//!
//! ```text
//! main() -> Plan::load -> TaskQueue::spawn(ConsoleHooks) -> command loop
//!                                                             |
//!                                                             v
//!                                  stdin line -> ControlCommand -> TaskQueue
//! ```
//!
//! Status lines go to stdout; logs go to `~/.supertask/logs/supertask.log`.

mod args;
mod console;
mod plan;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, stdin};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use supertask_engine::{QueueOptions, QueueState, SupertaskConfig, TaskQueue};

use crate::args::{Cli, Commands, RunArgs};
use crate::console::{ConsoleHooks, ControlCommand, HELP};
use crate::plan::{Plan, StepNumbering};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Keep stdout for status lines.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.supertask/logs/supertask.log
    if let Some(config_path) = SupertaskConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("supertask.log"));
    }

    // Fallback: ./.supertask/logs/supertask.log
    candidates.push(PathBuf::from(".supertask").join("logs").join("supertask.log"));

    candidates
}

fn load_options(config: Option<&PathBuf>, immediate: bool) -> Result<QueueOptions> {
    let config = match config {
        Some(path) => Some(SupertaskConfig::load_from(path)?),
        None => SupertaskConfig::load()?,
    };
    let mut options = config
        .as_ref()
        .map(SupertaskConfig::queue_options)
        .unwrap_or_default();
    if immediate {
        options.immediate = true;
    }
    Ok(options)
}

async fn run(args: RunArgs, config: Option<PathBuf>) -> Result<()> {
    let plan = Plan::load(&args.plan)?;
    let options = load_options(config.as_ref(), args.immediate)?;
    tracing::info!(
        plan = %args.plan.display(),
        steps = plan.steps.len(),
        immediate = options.immediate,
        "Starting queue"
    );

    let mut numbering = StepNumbering::default();
    let hooks = Arc::new(ConsoleHooks::new(numbering.assign(&plan)));
    let queue = TaskQueue::spawn(plan.step_specs(), Arc::clone(&hooks), options);

    println!("{HELP}");
    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let command = match ControlCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("error: {message}");
                println!("{HELP}");
                continue;
            }
        };

        let state = match command {
            ControlCommand::Pause => queue.pause().await?,
            ControlCommand::Resume => queue.resume().await?,
            ControlCommand::Restart(delay) => queue.restart(delay).await?,
            ControlCommand::Destroy => queue.destroy().await?,
            ControlCommand::Reload { plan, run } => {
                match reload(&queue, &hooks, &mut numbering, &plan, run).await {
                    Ok(state) => state,
                    Err(err) => {
                        println!("error: {err:#}");
                        continue;
                    }
                }
            }
            ControlCommand::State => {
                let snapshot = queue.snapshot();
                println!(
                    "{} (step {}/{})",
                    snapshot.state, snapshot.cursor, snapshot.len
                );
                continue;
            }
            ControlCommand::Quit => break,
        };
        println!("-> {state}");
    }

    // Let in-flight work settle before the runtime shuts down.
    let state = queue
        .wait_for_state(|state| state != QueueState::Executing)
        .await?;
    tracing::info!(%state, "Exiting");
    Ok(())
}

/// Replace the queue with the steps of another plan.
///
/// Names are only swapped when the engine accepted the new steps; a replace
/// sent while a step is executing is ignored.
async fn reload(
    queue: &TaskQueue,
    hooks: &ConsoleHooks,
    numbering: &mut StepNumbering,
    path: &Path,
    run: bool,
) -> Result<QueueState> {
    let plan = Plan::load(path)?;
    let mut next = numbering.clone();
    let names = next.assign(&plan);

    let state = queue.replace_queue(plan.step_specs(), false).await?;
    if state == QueueState::Executing {
        anyhow::bail!("cannot reload while a step is executing");
    }
    *numbering = next;
    hooks.rename(names);
    tracing::info!(plan = %path.display(), steps = plan.steps.len(), "Plan reloaded");

    if run {
        Ok(queue.resume().await?)
    } else {
        Ok(state)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Run(args) => run(args, cli.config).await,
    }
}
