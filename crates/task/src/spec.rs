// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `task.yml` loading. A task's own spec is kept as a raw JSON object (not a
//! fixed struct) so that [`crate::task::Task::full_spec`] can deep-merge it
//! with ancestors the same way [`repro_core::Config::merge`] does, without
//! losing fields this crate doesn't know about.

use crate::error::TaskError;
use serde_json::{Map, Value};
use std::path::Path;

pub type RawSpec = Map<String, Value>;

pub const SPEC_FILE_NAME: &str = "task.yml";

/// Reads and parses `<dir>/task.yml`. A missing file yields an empty spec
/// (a directory with no spec file is a non-runnable, config-only node).
pub fn load_spec_file(dir: &Path) -> Result<RawSpec, TaskError> {
    let path = dir.join(SPEC_FILE_NAME);
    if !path.is_file() {
        return Ok(RawSpec::new());
    }
    parse_spec_file(&path)
}

pub fn parse_spec_file(path: &Path) -> Result<RawSpec, TaskError> {
    let text = std::fs::read_to_string(path)?;
    parse_spec_str(&text).map_err(|source| TaskError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_spec_str(text: &str) -> Result<RawSpec, serde_yaml::Error> {
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(text)?;
    if yaml_value.is_null() {
        return Ok(RawSpec::new());
    }
    let json_value: Value = serde_yaml::from_value(yaml_value)?;
    Ok(match json_value {
        Value::Object(map) => map,
        _ => RawSpec::new(),
    })
}

/// A `pipeline` spec field: either a single factory identifier, or a list
/// of stage identifiers to order into a pipeline directly.
#[derive(Debug, Clone)]
pub enum PipelineSpec {
    Factory(String),
    Stages(Vec<String>),
}

pub fn pipeline_spec(full_spec: &RawSpec) -> Option<PipelineSpec> {
    match full_spec.get("pipeline")? {
        Value::String(s) => Some(PipelineSpec::Factory(s.clone())),
        Value::Array(items) => Some(PipelineSpec::Stages(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        )),
        _ => None,
    }
}

pub fn scopes_spec(full_spec: &RawSpec) -> indexmap::IndexMap<String, String> {
    match full_spec.get("scopes") {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
        _ => indexmap::IndexMap::new(),
    }
}

pub fn marginal_stage_specs(full_spec: &RawSpec) -> Vec<String> {
    match full_spec.get("marginal_stages") {
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    }
}

pub fn base_config_path(full_spec: &RawSpec) -> Option<String> {
    full_spec.get("base_config_path").and_then(|v| v.as_str()).map(str::to_string)
}
