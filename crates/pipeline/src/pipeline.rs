// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `Pipeline`: an ordered list of stages plus named path-template scopes.

use indexmap::IndexMap;
use repro_core::{
    Config, ConfigureKind, InputId, PipelineData, PipelineView, Stage, StageError, StageEvent,
    StageId, StatusSink, TaskCallbacks,
};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("duplicate stage id: {0}")]
    DuplicateStageId(StageId),
    #[error("duplicate output field: {0:?}")]
    DuplicateOutput(String),
    #[error("no remaining stage can be ordered: unmet inputs or a dependency cycle")]
    Unorderable,
    #[error("unknown stage: {0:?}")]
    UnknownStage(String),
    #[error("unknown scope: {0:?}")]
    UnknownScope(String),
    #[error("first_stage is set but no prior data was supplied")]
    EmptyDataWithFirstStage,
    #[error("stage {0} is already present in the pipeline")]
    DuplicateAppend(StageId),
    #[error("append: unknown anchor stage {0}")]
    UnknownAnchor(StageId),
    #[error(transparent)]
    Stage(#[from] StageError),
}

/// An ordered, topologically valid sequence of stages plus scopes (named
/// path templates interpolated with an input identifier).
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    scopes: IndexMap<String, String>,
}

impl Pipeline {
    /// Order a free list of stages per spec §4.3: repeatedly pick any
    /// remaining stage whose inputs are satisfied and whose consumed
    /// fields are not required by any other remaining stage's inputs.
    pub fn create(
        stages: Vec<Arc<dyn Stage>>,
        scopes: IndexMap<String, String>,
    ) -> Result<Pipeline, PipelineError> {
        let mut seen_ids = HashSet::new();
        for s in &stages {
            if !seen_ids.insert(s.id()) {
                return Err(PipelineError::DuplicateStageId(s.id()));
            }
        }
        let mut seen_outputs = HashSet::new();
        for s in &stages {
            for o in s.outputs() {
                if !seen_outputs.insert(o.clone()) {
                    return Err(PipelineError::DuplicateOutput(o));
                }
            }
        }

        let mut remaining: Vec<Arc<dyn Stage>> = stages;
        let mut ordered: Vec<Arc<dyn Stage>> = Vec::new();
        let mut available: HashSet<String> = HashSet::new();
        available.insert("input".to_string());

        while !remaining.is_empty() {
            let chosen = remaining.iter().enumerate().find(|(i, s)| {
                let inputs_ok = s.inputs().iter().all(|f| available.contains(f));
                if !inputs_ok {
                    return false;
                }
                let consumes = s.consumes();
                if consumes.is_empty() {
                    return true;
                }
                !remaining
                    .iter()
                    .enumerate()
                    .any(|(j, other)| *i != j && other.inputs().iter().any(|f| consumes.contains(f)))
            });

            match chosen.map(|(i, _)| i) {
                Some(i) => {
                    let stage = remaining.remove(i);
                    for o in stage.outputs() {
                        available.insert(o);
                    }
                    for c in stage.consumes() {
                        available.remove(&c);
                    }
                    ordered.push(stage);
                }
                None => return Err(PipelineError::Unorderable),
            }
        }

        Ok(Pipeline {
            stages: ordered,
            scopes,
        })
    }

    /// `{"input"} ∪ ⋃ outputs` across every stage.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        fields.insert("input".to_string());
        for s in &self.stages {
            fields.extend(s.outputs());
        }
        fields
    }

    /// `fields()` minus every field consumed by some stage — the keys a
    /// completed, unstripped run actually leaves in the pipeline data.
    pub fn persistent_fields(&self) -> BTreeSet<String> {
        let mut consumed = BTreeSet::new();
        for s in &self.stages {
            consumed.extend(s.consumes());
        }
        self.fields().difference(&consumed).cloned().collect()
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Index of a stage by id, or `usize::MAX` if absent.
    pub fn find(&self, id: &StageId) -> usize {
        self.stages
            .iter()
            .position(|s| s.id() == *id)
            .unwrap_or(usize::MAX)
    }

    pub fn stage(&self, id: &StageId) -> Option<&Arc<dyn Stage>> {
        self.stages.iter().find(|s| s.id() == *id)
    }

    /// Insert `stage` immediately after the stage `after` (or at the end,
    /// if `after` is `None`). Rejects a duplicate id.
    pub fn append(&mut self, stage: Arc<dyn Stage>, after: Option<&StageId>) -> Result<(), PipelineError> {
        if self.stages.iter().any(|s| s.id() == stage.id()) {
            return Err(PipelineError::DuplicateAppend(stage.id()));
        }
        let pos = match after {
            None => self.stages.len(),
            Some(id) => {
                let idx = self.find(id);
                if idx == usize::MAX {
                    return Err(PipelineError::UnknownAnchor(id.clone()));
                }
                idx + 1
            }
        };
        self.stages.insert(pos, stage);
        Ok(())
    }

    /// Interpolate a scope template's single `%s` placeholder with `input`.
    pub fn resolve(&self, scope: &str, input: &InputId) -> Result<PathBuf, PipelineError> {
        let template = self
            .scopes
            .get(scope)
            .ok_or_else(|| PipelineError::UnknownScope(scope.to_string()))?;
        Ok(PathBuf::from(template.replacen("%s", &input.to_string(), 1)))
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains_key(scope)
    }

    /// Apply every stage's `configure` rule to a copy of `base_config`.
    pub fn configure(&self, base_config: &Config, input: &InputId) -> Config {
        let mut config = base_config.copy();
        for stage in &self.stages {
            let rules = stage.configure(self, input);
            for (key, rule) in rules {
                let af_key = format!("{}/AF_{key}", stage.id());
                let full_key = format!("{}/{key}", stage.id());

                let af_value = config.set_default(&af_key, rule.default_user_factor.clone(), false);
                let af_num = af_value.as_f64().unwrap_or(0.0);
                let mut computed = rule.factor * af_num;

                let coerced = match rule.kind {
                    Some(ConfigureKind::Int) => {
                        if let Some(min) = rule.min {
                            computed = computed.max(min);
                        }
                        if let Some(max) = rule.max {
                            computed = computed.min(max);
                        }
                        json!(computed.round() as i64)
                    }
                    Some(ConfigureKind::Bool) => json!(computed != 0.0),
                    Some(ConfigureKind::Float) | None => {
                        if let Some(min) = rule.min {
                            computed = computed.max(min);
                        }
                        if let Some(max) = rule.max {
                            computed = computed.min(max);
                        }
                        json!(computed)
                    }
                };
                config.set_default(&full_key, coerced, false);
            }
        }
        config
    }

    fn resolve_stage_ref(&self, raw: &str) -> Result<usize, PipelineError> {
        if let Some(base) = raw.strip_suffix('+') {
            let idx = self.find(&StageId::new(base));
            if idx == usize::MAX {
                return Err(PipelineError::UnknownStage(base.to_string()));
            }
            Ok(idx + 1)
        } else {
            let idx = self.find(&StageId::new(raw));
            if idx == usize::MAX {
                return Err(PipelineError::UnknownStage(raw.to_string()));
            }
            Ok(idx)
        }
    }

    /// Execute a run for one input. `data` seeds the already-available
    /// fields (empty, or an ancestor's pickup data). `first_stage`/
    /// `last_stage` bound the execution window; a trailing `+` on
    /// `first_stage` means "the stage immediately after".
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &self,
        input: &InputId,
        config: &Config,
        first_stage: Option<&str>,
        last_stage: Option<&str>,
        mut data: PipelineData,
        status: &dyn StatusSink,
        callbacks: Option<&dyn TaskCallbacks>,
    ) -> Result<(PipelineData, IndexMap<StageId, f64>), PipelineError> {
        let mut first_idx = match first_stage {
            Some(raw) => Some(self.resolve_stage_ref(raw)?),
            None => None,
        };

        // Normalize: nothing to skip if we're starting at the very first
        // stage and have no prior data.
        if first_idx == Some(0) && data.is_empty() {
            first_idx = None;
        }
        if first_idx.is_some() && data.is_empty() {
            return Err(PipelineError::EmptyDataWithFirstStage);
        }

        let last_idx = match last_stage {
            Some(raw) => self.resolve_stage_ref(raw)?,
            None => self.stages.len().saturating_sub(1),
        };
        let window_start = first_idx.unwrap_or(0).min(self.stages.len());
        let window_end = last_idx.min(self.stages.len().saturating_sub(1));

        let mut included: BTreeSet<usize> = if window_start <= window_end {
            (window_start..=window_end).collect()
        } else {
            BTreeSet::new()
        };

        // Backward closure: pull in any stage before the window whose
        // output satisfies an otherwise-missing input.
        let mut available: HashSet<String> = data.keys().cloned().collect();
        available.insert("input".to_string());

        for _ in 0..=self.stages.len() {
            let produced: HashSet<String> = included
                .iter()
                .flat_map(|&i| self.stages[i].outputs())
                .collect();
            let have: HashSet<String> = available.union(&produced).cloned().collect();

            let missing: Vec<String> = included
                .iter()
                .flat_map(|&i| self.stages[i].inputs())
                .filter(|f| !have.contains(f))
                .collect();

            if missing.is_empty() {
                break;
            }

            let mut added = false;
            for idx in 0..window_start {
                if included.contains(&idx) {
                    continue;
                }
                if self.stages[idx].outputs().iter().any(|o| missing.contains(o)) {
                    included.insert(idx);
                    added = true;
                }
            }
            if !added {
                break;
            }
        }

        let mut timings: IndexMap<StageId, f64> = IndexMap::new();

        for (idx, stage) in self.stages.iter().enumerate() {
            if !included.contains(&idx) {
                drive_skip(stage.as_ref(), input, config, status, callbacks);
                continue;
            }
            let enabled_key = format!("{}/enabled", stage.id());
            let enabled = match config.get_opt(&enabled_key) {
                Some(Value::Bool(b)) => *b,
                _ => stage.enabled_by_default(),
            };
            if !enabled {
                drive_skip(stage.as_ref(), input, config, status, callbacks);
                continue;
            }
            let elapsed = drive_run(stage.as_ref(), input, config, status, &mut data, callbacks)?;
            timings.insert(stage.id(), elapsed);
        }

        Ok((data, timings))
    }
}

impl PipelineView for Pipeline {
    fn fields(&self) -> BTreeSet<String> {
        Pipeline::fields(self)
    }

    fn stage_index(&self, id: &StageId) -> Option<usize> {
        let idx = self.find(id);
        (idx != usize::MAX).then_some(idx)
    }
}

fn drive_run(
    stage: &dyn Stage,
    input: &InputId,
    config: &Config,
    status: &dyn StatusSink,
    data: &mut PipelineData,
    callbacks: Option<&dyn TaskCallbacks>,
) -> Result<f64, PipelineError> {
    status.intermediate(Some(
        json!({"info": "start-stage", "stage": stage.id().as_str(), "intermediate": true}),
    ));
    stage.on_start(input, config);
    if let Some(cb) = callbacks {
        cb.on_stage_event(&stage.id(), StageEvent::Start, input, config);
    }

    let start = Instant::now();
    let stage_inputs: PipelineData = stage
        .inputs()
        .into_iter()
        .filter_map(|k| data.get(&k).map(|v| (k, v.clone())))
        .collect();
    let outputs = stage.process(config, status, &stage_inputs)?;
    let elapsed = start.elapsed().as_secs_f64();

    let declared = stage.outputs();
    let got: BTreeSet<String> = outputs.keys().cloned().collect();
    if got != declared {
        let missing: Vec<String> = declared.difference(&got).cloned().collect();
        let unexpected: Vec<String> = got.difference(&declared).cloned().collect();
        return Err(PipelineError::Stage(StageError::OutputMismatch {
            stage: stage.id(),
            missing,
            unexpected,
        }));
    }

    for (k, v) in outputs {
        data.insert(k, v);
    }
    for c in stage.consumes() {
        data.shift_remove(&c);
    }

    stage.on_end(input, config);
    if let Some(cb) = callbacks {
        cb.on_stage_event(&stage.id(), StageEvent::End, input, config);
    }
    Ok(elapsed)
}

fn drive_skip(
    stage: &dyn Stage,
    input: &InputId,
    config: &Config,
    status: &dyn StatusSink,
    callbacks: Option<&dyn TaskCallbacks>,
) {
    status.intermediate(Some(
        json!({"info": "skip-stage", "stage": stage.id().as_str(), "intermediate": true}),
    ));
    stage.on_skip(input, config);
    if let Some(cb) = callbacks {
        cb.on_stage_event(&stage.id(), StageEvent::Skip, input, config);
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
