// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `Batch`: loads a directory tree of tasks, caching by canonicalized path
//! so repeated lookups (and ancestor resolution) always return the same
//! [`Task`] handle, and enumerates run contexts for the runnable ones.

use crate::error::BatchError;
use parking_lot::Mutex;
use repro_core::Config;
use repro_pipeline::Pipeline;
use repro_status::Status;
use repro_task::{spec, RawSpec, Registry, Task};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// The pipeline and hyperparameters composed for one runnable task, built
/// eagerly so a later mutation of the underlying task spec cannot change an
/// already-constructed context out from under a caller.
pub struct RunContext {
    pub task: Task,
    pub pipeline: Pipeline,
    pub config: Config,
}

/// Builds the child process that runs one task in isolation (§4.5, §9).
///
/// The core has no concrete stage implementations to re-construct in a
/// child process, so the embedder supplies this: given the task to run and
/// the status node the child should write into, produce the `Command` that
/// re-execs into code able to rebuild that task's [`Registry`], [`Pipeline`]
/// and [`Config`] and call [`Task::run`]. The typical implementation
/// re-executes `std::env::current_exe()` with a hidden subcommand carrying
/// `task_path`, `status_root`, and `status_file`, and attaches to the status
/// node with [`repro_status::Status::attach`] rather than starting a fresh one.
pub trait ChildCommand: Send + Sync {
    fn build(&self, task_path: &Path, status_root: &Path, status_file: &str) -> Command;
}

struct Inner {
    root: PathBuf,
    tasks: Mutex<HashMap<PathBuf, Task>>,
}

/// A cache-by-path factory over a directory tree of `task.yml` files.
#[derive(Clone)]
pub struct Batch {
    inner: Arc<Inner>,
}

impl Batch {
    /// An empty batch rooted at `root` (not yet canonicalized or scanned);
    /// tasks are added on demand via [`Batch::task`].
    pub fn new(root: impl Into<PathBuf>) -> Result<Batch, BatchError> {
        let root = canonicalize_dir(&root.into())?;
        Ok(Batch {
            inner: Arc::new(Inner {
                root,
                tasks: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Glob every `task.yml` under `root` and instantiate its task (in any
    /// order; the path cache makes parent resolution order-independent).
    pub fn load(root: impl Into<PathBuf>) -> Result<Batch, BatchError> {
        let batch = Batch::new(root)?;
        let escaped = glob::Pattern::escape(&batch.inner.root.to_string_lossy());
        let pattern = format!("{escaped}/**/{}", spec::SPEC_FILE_NAME);
        for entry in glob::glob(&pattern)? {
            let spec_path = entry?;
            if let Some(dir) = spec_path.parent() {
                batch.task(dir, None)?;
            }
        }
        Ok(batch)
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Retrieve (or instantiate) the task rooted at `path`, caching by its
    /// canonicalized directory. Without an explicit `spec`, `path/task.yml`
    /// is parsed (a missing file yields an empty, non-runnable spec, per
    /// [`repro_task::spec::load_spec_file`]). The parent is the nearest
    /// ancestor directory that itself holds a `task.yml`.
    pub fn task(&self, path: impl AsRef<Path>, spec: Option<RawSpec>) -> Result<Task, BatchError> {
        let canonical = canonicalize_dir(path.as_ref())?;
        if let Some(existing) = self.inner.tasks.lock().get(&canonical).cloned() {
            if let Some(explicit) = &spec {
                if existing.spec() != explicit {
                    return Err(BatchError::SpecMismatch(canonical));
                }
            }
            return Ok(existing);
        }

        let own_spec = match spec {
            Some(s) => s,
            None => repro_task::spec::load_spec_file(&canonical)?,
        };
        let parent = self.nearest_ancestor_task(&canonical)?;
        let task = Task::new(canonical.clone(), own_spec, parent);
        self.inner.tasks.lock().insert(canonical, task.clone());
        Ok(task)
    }

    fn nearest_ancestor_task(&self, dir: &Path) -> Result<Option<Task>, BatchError> {
        let mut current = dir.parent();
        while let Some(candidate) = current {
            if candidate.join(spec::SPEC_FILE_NAME).is_file() {
                return Ok(Some(self.task(candidate, None)?));
            }
            current = candidate.parent();
        }
        Ok(None)
    }

    /// Every task instantiated so far, sorted by path for deterministic
    /// iteration (a `HashMap`'s own order is not stable).
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.inner.tasks.lock().values().cloned().collect();
        tasks.sort_by(|a, b| a.path().cmp(b.path()));
        tasks
    }

    /// A [`RunContext`] for every runnable task.
    pub fn contexts(&self, registry: &Registry) -> Result<Vec<RunContext>, BatchError> {
        let mut out = Vec::new();
        for task in self.tasks() {
            if !task.runnable() {
                continue;
            }
            let pipeline = task.create_pipeline(registry)?;
            let config = task.create_config()?;
            out.push(RunContext { task, pipeline, config });
        }
        Ok(out)
    }

    /// The subset of [`Batch::contexts`] whose task is not up to date.
    pub fn pending(&self, registry: &Registry) -> Result<Vec<RunContext>, BatchError> {
        let mut out = Vec::new();
        for ctx in self.contexts(registry)? {
            if ctx.task.is_pending(&ctx.pipeline, &ctx.config)?.is_pending() {
                out.push(ctx);
            }
        }
        Ok(out)
    }

    /// Run every context in its own child process, strictly sequentially
    /// (§4.5, §5): the parent blocks on each child's exit and a non-zero
    /// exit aborts the remaining batch. Returns `true` iff every context
    /// succeeded.
    pub fn run(&self, contexts: &[RunContext], status: &Status, spawner: &dyn ChildCommand) -> Result<bool, BatchError> {
        let step_count = contexts.len();
        for (step, ctx) in contexts.iter().enumerate() {
            let child_status = status.derive();
            status.write(json!({
                "info": "enter",
                "task": ctx.task.path().to_string_lossy(),
                "step": step,
                "step_count": step_count,
            }));

            tracing::debug!(task = %ctx.task.path().display(), step, step_count, "spawning child for task");
            let mut command = spawner.build(ctx.task.path(), child_status.root_dir(), child_status.file_name());
            let exit = command.status()?;
            if !exit.success() {
                tracing::warn!(task = %ctx.task.path().display(), code = exit.code(), "child exited non-zero, halting batch");
                status.write(json!({"info": "interrupted"}));
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn canonicalize_dir(path: &Path) -> Result<PathBuf, BatchError> {
    std::fs::canonicalize(path).map_err(BatchError::Io)
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
