// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors raised while loading, digesting, and running a task.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid task.yml at {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input_ids: {0}")]
    InputId(#[from] repro_core::InputIdError),
    #[error(transparent)]
    Pipeline(#[from] repro_pipeline::PipelineError),
    #[error(transparent)]
    Benchmark(#[from] repro_pipeline::BenchmarkError),
    #[error("{path} is not a mapping")]
    SpecNotMapping { path: PathBuf },
    #[error("task {0:?} is not runnable")]
    NotRunnable(PathBuf),
    #[error("task {0:?} has no pipeline spec")]
    MissingPipelineSpec(PathBuf),
    #[error("unknown stage or pipeline factory: {0:?}")]
    UnknownFactory(String),
    #[error("pick-up data is inconsistent: {0}")]
    InconsistentData(String),
    #[error("no stored data for task {0:?}")]
    NoStoredData(PathBuf),
}
