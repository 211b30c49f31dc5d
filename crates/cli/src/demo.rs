// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A tiny built-in stage registry.
//!
//! The engine has no concrete stage implementations of its own — those are
//! supplied by whoever embeds `repro-core`/`repro-task`/`repro-batch` into
//! their own binary, the same way an embedder provides their own `Stage`
//! impls and links them into their own `main()`. This binary ships two
//! arithmetic stages purely so `repro` is runnable end to end out of the
//! box and so the child-process re-exec path has something real to invoke.

use repro_core::{Config, PipelineData, Stage, StageError, StageId, StatusSink};
use repro_task::Registry;
use std::collections::BTreeSet;
use std::sync::Arc;

/// `result = (input * factor) + offset`, split across two stages so a task
/// tree can exercise pickup: overriding `offset/add` alone leaves `scaled`
/// reusable from an ancestor.
struct ScaleStage;

impl Stage for ScaleStage {
    fn id(&self) -> StageId {
        StageId::new("scale")
    }
    fn inputs(&self) -> BTreeSet<String> {
        ["input".to_string()].into_iter().collect()
    }
    fn outputs(&self) -> BTreeSet<String> {
        ["scaled".to_string()].into_iter().collect()
    }
    fn process(&self, config: &Config, _status: &dyn StatusSink, inputs: &PipelineData) -> Result<PipelineData, StageError> {
        let factor = config.get_opt("scale/factor").and_then(|v| v.as_f64()).unwrap_or(1.0);
        let input = inputs.get("input").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let mut out = PipelineData::new();
        out.insert("scaled".to_string(), serde_json::json!(input * factor));
        Ok(out)
    }
}

struct OffsetStage;

impl Stage for OffsetStage {
    fn id(&self) -> StageId {
        StageId::new("offset")
    }
    fn inputs(&self) -> BTreeSet<String> {
        ["scaled".to_string()].into_iter().collect()
    }
    fn outputs(&self) -> BTreeSet<String> {
        ["result".to_string()].into_iter().collect()
    }
    fn process(&self, config: &Config, _status: &dyn StatusSink, inputs: &PipelineData) -> Result<PipelineData, StageError> {
        let add = config.get_opt("offset/add").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let scaled = inputs.get("scaled").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let mut out = PipelineData::new();
        out.insert("result".to_string(), serde_json::json!(scaled + add));
        Ok(out)
    }
}

/// The registry this binary re-constructs identically in both the parent
/// process (to compose pipelines when listing/running) and the re-exec'd
/// child (to compose the same pipeline again before calling `Task::run`).
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_stage("scale", Arc::new(|| Arc::new(ScaleStage) as Arc<dyn Stage>));
    registry.register_stage("offset", Arc::new(|| Arc::new(OffsetStage) as Arc<dyn Stage>));
    registry
}
