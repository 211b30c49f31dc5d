// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! *Task data*: a mapping from input identifier to the pipeline data
//! produced for it, persisted as `data.dill.gz`.
//!
//! The original stores this blob with a general-purpose object pickler,
//! since a stage's outputs there can be arbitrary host objects. Here a
//! stage's outputs are already constrained to JSON-serializable
//! [`repro_core::PipelineData`], so the opaque blob is simply gzip-compressed
//! canonical JSON; the `.gz` extension this spec names is honored literally
//! rather than substituted for a different compression scheme.

use crate::error::TaskError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use indexmap::IndexMap;
use repro_core::{InputId, PipelineData};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub type TaskData = IndexMap<InputId, PipelineData>;

pub fn store_data(path: &Path, data: &TaskData) -> Result<(), TaskError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("gz.tmp");
    let json = serde_json::to_vec(data)?;
    {
        let file = File::create(&tmp_path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&json)?;
        encoder.finish()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn load_data(path: &Path) -> Result<TaskData, TaskError> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
#[path = "data_tests.rs"]
mod tests;
