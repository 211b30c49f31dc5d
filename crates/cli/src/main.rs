// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `repro` — thin external interface over the task/batch/status engine
//! (§6): enumerate or run the pending tasks under a directory tree.
//!
//! This binary also doubles as the re-exec target `Batch::run` uses for
//! per-task process isolation (§4.5, §9): invoked with the hidden
//! `--internal-*` flags, it reconstructs the one task named and drives it
//! to completion instead of walking the whole tree.

mod demo;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use output::OutputFormat;
use repro_batch::{Batch, BatchError, ChildCommand, RunContext};
use repro_core::StageError;
use repro_pipeline::PipelineError;
use repro_status::Status;
use repro_task::TaskError;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Errors that can surface while a re-exec'd child reconstructs and runs
/// its one task.
#[derive(Debug, Error)]
enum ChildError {
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

#[derive(Parser)]
#[command(name = "repro", version, about = "Run a tree of reproducible batch tasks")]
struct Cli {
    /// Root directory of the task tree
    path: PathBuf,

    /// Execute pending tasks instead of only listing them
    #[arg(long)]
    run: bool,

    /// Restrict to this task (repeatable)
    #[arg(long = "task", value_name = "PATH")]
    task: Vec<PathBuf>,

    /// Restrict to this task and its sub-tree (repeatable)
    #[arg(long = "task-dir", value_name = "PATH")]
    task_dir: Vec<PathBuf>,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t)]
    output: OutputFormat,

    /// Internal: run a single task in this process instead of the whole
    /// tree, writing into the status node below. Used only by the
    /// child process `Batch::run` spawns; not a public interface.
    #[arg(long = "internal-run-task", hide = true, value_name = "PATH")]
    internal_run_task: Option<PathBuf>,
    #[arg(long = "internal-status-root", hide = true, value_name = "DIR", requires = "internal_run_task")]
    internal_status_root: Option<PathBuf>,
    #[arg(long = "internal-status-file", hide = true, value_name = "NAME", requires = "internal_run_task")]
    internal_status_file: Option<String>,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let outcome = run(cli);
    let code = match outcome {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<bool> {
    if let Some(task_path) = &cli.internal_run_task {
        let status_root = cli.internal_status_root.as_ref().context("missing --internal-status-root")?;
        let status_file = cli.internal_status_file.as_ref().context("missing --internal-status-file")?;
        return Ok(run_child(&cli.path, task_path, status_root, status_file));
    }

    let registry = demo::registry();
    let batch = Batch::load(&cli.path).with_context(|| format!("loading task tree at {:?}", cli.path))?;
    let pending = batch.pending(&registry).context("computing pending tasks")?;
    let selected = filter_contexts(pending, &cli.task, &cli.task_dir)?;
    tracing::debug!(root = %cli.path.display(), pending = selected.len(), "resolved pending tasks");

    if !cli.run {
        print_listing(&selected, cli.output);
        return Ok(true);
    }

    let (status, _status_dir) = Status::create_temp().context("creating status root")?;
    let spawner = ReexecSpawner { batch_root: cli.path.clone() };
    let ok = batch.run(&selected, &status, &spawner).context("running batch")?;
    tracing::info!(root = %cli.path.display(), ok, "batch run finished");
    print_result(ok, cli.output);
    Ok(ok)
}

/// Re-exec `std::env::current_exe()` with the hidden internal flags, the
/// approach the design notes prescribe for runtimes without `fork` (§9):
/// the child re-constructs its `Task`/`Pipeline`/`Config` from the task
/// path and the (identical, statically-registered) demo registry rather
/// than receiving them over the process boundary.
struct ReexecSpawner {
    batch_root: PathBuf,
}

impl ChildCommand for ReexecSpawner {
    fn build(&self, task_path: &Path, status_root: &Path, status_file: &str) -> Command {
        let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("repro"));
        let mut command = Command::new(exe);
        command
            .arg(&self.batch_root)
            .arg("--internal-run-task")
            .arg(task_path)
            .arg("--internal-status-root")
            .arg(status_root)
            .arg("--internal-status-file")
            .arg(status_file);
        command
    }
}

/// The body of the re-exec'd child process: load the tree, find the one
/// task named, run it, and report any failure as a permanent status entry
/// before signalling failure via a non-zero process exit (§4.5, §7).
fn run_child(batch_root: &Path, task_path: &Path, status_root: &Path, status_file: &str) -> bool {
    let status = Status::attach(status_root, status_file);
    match run_child_inner(batch_root, task_path, &status) {
        Ok(()) => true,
        Err(err) => {
            status.write(json!({
                "info": "error",
                "task": task_path.to_string_lossy(),
                "traceback": format!("{err:#}"),
                "stage": stage_of(&err),
            }));
            false
        }
    }
}

fn run_child_inner(batch_root: &Path, task_path: &Path, status: &Status) -> Result<(), ChildError> {
    let registry = demo::registry();
    let batch = Batch::load(batch_root)?;
    let task = batch.task(task_path, None)?;
    let pipeline = task.create_pipeline(&registry)?;
    let config = task.create_config()?;
    task.run(&config, &pipeline, &registry, true, true, status, None)?;
    Ok(())
}

/// The stage a `ChildError` failed at, if the underlying error names one.
fn stage_of(err: &ChildError) -> Option<String> {
    match err {
        ChildError::Task(TaskError::Pipeline(PipelineError::Stage(stage_err))) => match stage_err {
            StageError::OutputMismatch { stage, .. } => Some(stage.as_str().to_string()),
            StageError::Failed { stage, .. } => Some(stage.as_str().to_string()),
        },
        _ => None,
    }
}

fn filter_contexts(contexts: Vec<RunContext>, tasks: &[PathBuf], task_dirs: &[PathBuf]) -> Result<Vec<RunContext>> {
    if tasks.is_empty() && task_dirs.is_empty() {
        return Ok(contexts);
    }
    let exact: Vec<PathBuf> = tasks
        .iter()
        .map(|p| std::fs::canonicalize(p).with_context(|| format!("--task {p:?}")))
        .collect::<Result<_>>()?;
    let dirs: Vec<PathBuf> = task_dirs
        .iter()
        .map(|p| std::fs::canonicalize(p).with_context(|| format!("--task-dir {p:?}")))
        .collect::<Result<_>>()?;
    Ok(contexts
        .into_iter()
        .filter(|ctx| exact.iter().any(|p| p == ctx.task.path()) || dirs.iter().any(|d| ctx.task.path().starts_with(d)))
        .collect())
}

fn print_listing(contexts: &[RunContext], format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            if contexts.is_empty() {
                println!("no pending tasks");
            }
            for ctx in contexts {
                println!("{}", ctx.task.path().display());
            }
        }
        OutputFormat::Json => {
            let paths: Vec<String> = contexts.iter().map(|ctx| ctx.task.path().to_string_lossy().to_string()).collect();
            println!("{}", json!({ "pending": paths }));
        }
    }
}

fn print_result(ok: bool, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            if ok {
                println!("done");
            } else {
                eprintln!("batch interrupted");
            }
        }
        OutputFormat::Json => {
            println!("{}", json!({ "status": if ok { "ok" } else { "interrupted" } }));
        }
    }
}
