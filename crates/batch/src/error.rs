// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors raised while loading a task tree or running a batch.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("glob error: {0}")]
    Glob(#[from] glob::GlobError),
    #[error(transparent)]
    Task(#[from] repro_task::TaskError),
    #[error(transparent)]
    Pipeline(#[from] repro_pipeline::PipelineError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("task at {0:?} was already loaded with a different specification")]
    SpecMismatch(PathBuf),
    #[error("unknown task: {0:?}")]
    UnknownTask(PathBuf),
}
