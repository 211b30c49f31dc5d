// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `Task`: a node in the batch tree. Bears a merged spec, composes a
//! pipeline and config, decides whether it is pending, finds an ancestor to
//! pick up computation from, and drives one run.

use crate::data::{self, TaskData};
use crate::error::TaskError;
use crate::path;
use crate::registry::Registry;
use crate::spec::{self, PipelineSpec, RawSpec};
use indexmap::IndexMap;
use repro_core::{Config, InputId, PendingReason, PipelineData, ShaDigest, Stage, StageId};
use repro_pipeline::{Benchmark, Pipeline};
use repro_status::Status;
use serde_json::{json, Map, Value};
use sha1::{Digest, Sha1};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct TaskInner {
    path: PathBuf,
    spec: RawSpec,
    parent: Option<Task>,
}

/// A node in the task tree. Cheaply cloneable; clones refer to the same
/// underlying directory and spec.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

/// Result of [`Task::find_pickup_task`]: the task to reuse stored data from
/// (if any) and the first stage that still needs to run (if any).
#[derive(Debug, Clone)]
pub struct PickupInfo {
    pub task: Option<Task>,
    pub first_diverging_stage: Option<StageId>,
}

impl Task {
    pub fn new(path: impl Into<PathBuf>, spec: RawSpec, parent: Option<Task>) -> Task {
        Task {
            inner: Arc::new(TaskInner {
                path: path.into(),
                spec,
                parent,
            }),
        }
    }

    /// Load a task from `<path>/task.yml`. A missing spec file yields an
    /// empty (non-runnable) spec node.
    pub fn load_from_dir(path: impl Into<PathBuf>, parent: Option<Task>) -> Result<Task, TaskError> {
        let path = path.into();
        let spec = spec::load_spec_file(&path)?;
        Ok(Task::new(path, spec, parent))
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// This node's own spec, before merging with ancestors.
    pub fn spec(&self) -> &RawSpec {
        &self.inner.spec
    }

    pub fn parent(&self) -> Option<&Task> {
        self.inner.parent.as_ref()
    }

    pub fn root(&self) -> Task {
        match self.parent() {
            Some(parent) => parent.root(),
            None => self.clone(),
        }
    }

    /// Ancestors, nearest first.
    pub fn ancestors(&self) -> Vec<Task> {
        let mut result = Vec::new();
        let mut current = self.parent().cloned();
        while let Some(task) = current {
            current = task.parent().cloned();
            result.push(task);
        }
        result
    }

    /// Deep merge of ancestors' specs with this node's own, child-wins.
    /// Reuses [`Config::merge`] (right-wins deep merge) rather than
    /// duplicating the recursion.
    pub fn full_spec(&self) -> RawSpec {
        let mut merged = match self.parent() {
            Some(parent) => Config::from_map(parent.full_spec()),
            None => Config::new(),
        };
        merged.merge(&Config::from_map(self.inner.spec.clone()));
        merged.entries().clone()
    }

    pub fn runnable(&self) -> bool {
        self.full_spec().get("runnable").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn input_ids(&self) -> Result<Vec<InputId>, TaskError> {
        let full_spec = self.full_spec();
        match full_spec.get("input_ids") {
            None => Ok(Vec::new()),
            Some(value) => {
                let spec: repro_core::InputIdSpec = serde_json::from_value(value.clone())?;
                Ok(spec.decode()?)
            }
        }
    }

    fn resolve_path(&self, raw: &str) -> PathBuf {
        path::resolve_path(raw, &self.inner.path, self.root().path())
    }

    pub fn data_filepath(&self) -> PathBuf {
        self.resolve_path("data.dill.gz")
    }

    pub fn digest_task_filepath(&self) -> PathBuf {
        self.resolve_path(".task.json")
    }

    pub fn digest_sha_filepath(&self) -> PathBuf {
        self.resolve_path(".sha.json")
    }

    pub fn times_filepath(&self) -> PathBuf {
        self.resolve_path("times.csv")
    }

    /// The persisted `.task.json` of the last completed run, if any.
    pub fn digest(&self) -> Result<Option<Value>, TaskError> {
        let path = self.digest_task_filepath();
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn load_sha_digest(&self) -> Result<ShaDigest, TaskError> {
        let text = std::fs::read_to_string(self.digest_sha_filepath())?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn get_full_spec_with_config(&self, config: &Config) -> RawSpec {
        let mut spec = self.full_spec();
        spec.insert("config".to_string(), Value::Object(config.entries().clone()));
        spec
    }

    /// SHA-1 of the canonical JSON of the full spec, optionally adopted for
    /// `config` (i.e. with a `config` key folded in).
    pub fn compute_sha(&self, config: Option<&Config>) -> Result<String, TaskError> {
        let full_spec = match config {
            Some(config) => self.get_full_spec_with_config(config),
            None => self.full_spec(),
        };
        let canonical = serde_json::to_string(&Value::Object(full_spec))?;
        let mut hasher = Sha1::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// Composes this task's hyperparameters: parent config, then
    /// `base_config_path`, then this node's own `config` — later layers
    /// win. Only this node's own spec is consulted for `config` and
    /// `base_config_path`; the parent contributes its own already-composed
    /// config, not its raw spec.
    pub fn create_config(&self) -> Result<Config, TaskError> {
        let own_spec = &self.inner.spec;
        let own_value = own_spec.get("config").cloned().unwrap_or_else(|| Value::Object(Map::new()));
        let mut config = Config::from_value(own_value).copy();

        if let Some(raw_base) = own_spec.get("base_config_path").and_then(Value::as_str) {
            let base_path = self.resolve_path(raw_base);
            let base_value = load_yaml_as_json(&base_path)?;
            let mut base_config = Config::from_value(base_value);
            base_config.merge(&config);
            config = base_config;
        }

        match self.parent() {
            Some(parent) => {
                let mut parent_config = parent.create_config()?;
                parent_config.merge(&config);
                Ok(parent_config)
            }
            None => Ok(config),
        }
    }

    pub fn create_pipeline(&self, registry: &Registry) -> Result<Pipeline, TaskError> {
        let full_spec = self.full_spec();
        let raw_scopes = spec::scopes_spec(&full_spec);
        let scopes: IndexMap<String, String> = raw_scopes
            .into_iter()
            .map(|(key, value)| (key, self.resolve_path(&value).to_string_lossy().to_string()))
            .collect();

        match spec::pipeline_spec(&full_spec) {
            None => Err(TaskError::MissingPipelineSpec(self.inner.path.clone())),
            Some(PipelineSpec::Factory(name)) => registry.construct_pipeline(&name, scopes),
            Some(PipelineSpec::Stages(names)) => {
                let stages = names
                    .iter()
                    .map(|name| registry.construct_stage(name))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Pipeline::create(stages, scopes)?)
            }
        }
    }

    pub fn marginal_stage_ids(&self, registry: &Registry) -> Result<BTreeSet<StageId>, TaskError> {
        let full_spec = self.full_spec();
        spec::marginal_stage_specs(&full_spec)
            .iter()
            .map(|raw| registry.resolve_stage_id(raw))
            .collect()
    }

    /// Outputs of every marginal stage: fields dropped from a chunk before
    /// it is merged into the persisted task data.
    pub fn marginal_fields(&self, pipeline: &Pipeline, registry: &Registry) -> Result<BTreeSet<String>, TaskError> {
        let ids = self.marginal_stage_ids(registry)?;
        let mut fields = BTreeSet::new();
        for stage in pipeline.stages() {
            if ids.contains(&stage.id()) {
                fields.extend(stage.outputs());
            }
        }
        Ok(fields)
    }

    pub fn strip_marginals(
        &self,
        pipeline: &Pipeline,
        registry: &Registry,
        chunk: &PipelineData,
    ) -> Result<PipelineData, TaskError> {
        let marginal = self.marginal_fields(pipeline, registry)?;
        Ok(chunk.iter().filter(|(key, _)| !marginal.contains(*key)).map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// `""` / `"incomplete"` / `"pipeline"` / `"specification"` per §4.4.
    pub fn is_pending(&self, pipeline: &Pipeline, config: &Config) -> Result<PendingReason, TaskError> {
        if !self.runnable() {
            return Ok(PendingReason::Complete);
        }
        if !self.digest_sha_filepath().is_file() {
            return Ok(PendingReason::Incomplete);
        }
        let digest = self.load_sha_digest()?;
        for stage in pipeline.stages() {
            match digest.stages.get(stage.id().as_str()) {
                Some(stored_sha) if *stored_sha == stage.sha() => {}
                _ => return Ok(PendingReason::Pipeline),
            }
        }
        if digest.task != self.compute_sha(Some(config))? {
            return Ok(PendingReason::Specification);
        }
        Ok(PendingReason::Complete)
    }

    /// Earliest stage that is new, changed, or whose sub-config changed
    /// since the stored digest; `None` if the task is fully up to date.
    pub fn find_first_diverging_stage(
        &self,
        pipeline: &Pipeline,
        config: &Config,
    ) -> Result<Option<StageId>, TaskError> {
        if !self.digest_sha_filepath().is_file() {
            return Ok(pipeline.stages().first().map(|s| s.id()));
        }
        let digest_sha = self.load_sha_digest()?;
        let digest_value = self.digest()?.unwrap_or(Value::Null);
        let digest_config = digest_value.get("config").cloned().unwrap_or_else(|| Value::Object(Map::new()));
        let empty_object = Value::Object(Map::new());

        for stage in pipeline.stages() {
            let id = stage.id();
            match digest_sha.stages.get(id.as_str()) {
                None => return Ok(Some(id)),
                Some(stored_sha) if *stored_sha != stage.sha() => return Ok(Some(id)),
                _ => {}
            }
            let stored_cfg = digest_config.get(id.as_str()).unwrap_or(&empty_object);
            let current_cfg = config.entries().get(id.as_str()).map(Value::clone).unwrap_or_else(|| empty_object.clone());
            if *stored_cfg != current_cfg {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Candidates are ancestors-of-self (nearest first) plus self. If any
    /// candidate has no divergence, it is used directly. Otherwise the
    /// candidate whose diverging stage is latest in the pipeline wins; if
    /// that stage is the pipeline's very first, there is nothing to pick
    /// up from.
    pub fn find_pickup_task(&self, pipeline: &Pipeline, config: &Config) -> Result<PickupInfo, TaskError> {
        let mut candidates = self.ancestors();
        candidates.push(self.clone());

        let mut diverging = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let stage = candidate.find_first_diverging_stage(pipeline, config)?;
            diverging.push((candidate.clone(), stage));
        }

        for (task, stage) in &diverging {
            if stage.is_none() {
                return Ok(PickupInfo {
                    task: Some(task.clone()),
                    first_diverging_stage: None,
                });
            }
        }

        let first_stage_id = pipeline.stages().first().map(|s| s.id());
        let mut best: Option<(Task, StageId, usize)> = None;
        for (task, stage) in diverging {
            if let Some(stage_id) = stage {
                let idx = pipeline.find(&stage_id);
                let better = match &best {
                    Some((_, _, best_idx)) => idx > *best_idx,
                    None => true,
                };
                if better {
                    best = Some((task, stage_id, idx));
                }
            }
        }

        match best {
            None => Ok(PickupInfo {
                task: None,
                first_diverging_stage: first_stage_id,
            }),
            Some((task, stage_id, _)) => {
                if first_stage_id.as_ref() == Some(&stage_id) {
                    Ok(PickupInfo {
                        task: None,
                        first_diverging_stage: Some(stage_id),
                    })
                } else {
                    Ok(PickupInfo {
                        task: Some(task),
                        first_diverging_stage: Some(stage_id),
                    })
                }
            }
        }
    }

    /// Previously stored task data, verified against this task's input
    /// ids and (if `pipeline` is given) its persistent non-marginal fields.
    pub fn load(&self, pipeline: Option<(&Pipeline, &Registry)>) -> Result<TaskData, TaskError> {
        if !self.runnable() {
            return Err(TaskError::NotRunnable(self.inner.path.clone()));
        }
        let path = self.data_filepath();
        if !path.is_file() {
            return Err(TaskError::NoStoredData(self.inner.path.clone()));
        }
        let data = data::load_data(&path)?;

        let expected_ids: BTreeSet<InputId> = self.input_ids()?.into_iter().collect();
        let got_ids: BTreeSet<InputId> = data.keys().cloned().collect();
        if got_ids != expected_ids {
            return Err(TaskError::InconsistentData("loaded data input ids do not match the task specification".into()));
        }

        if let Some((pipeline, registry)) = pipeline {
            let marginal = self.marginal_fields(pipeline, registry)?;
            let required: BTreeSet<String> = pipeline.persistent_fields().difference(&marginal).cloned().collect();
            for chunk in data.values() {
                let keys: BTreeSet<String> = chunk.keys().cloned().collect();
                if keys != required {
                    return Err(TaskError::InconsistentData("loaded data fields do not match the pipeline".into()));
                }
            }
        }
        Ok(data)
    }

    pub fn store(
        &self,
        pipeline: &Pipeline,
        registry: &Registry,
        data: &TaskData,
        config: &Config,
        times: &mut Benchmark,
    ) -> Result<(), TaskError> {
        if !self.runnable() {
            return Err(TaskError::NotRunnable(self.inner.path.clone()));
        }
        let expected_ids: BTreeSet<InputId> = self.input_ids()?.into_iter().collect();
        let got_ids: BTreeSet<InputId> = data.keys().cloned().collect();
        if got_ids != expected_ids {
            return Err(TaskError::InconsistentData("data to store does not match the task's input ids".into()));
        }

        let mut stripped: TaskData = IndexMap::new();
        for (id, chunk) in data {
            stripped.insert(id.clone(), self.strip_marginals(pipeline, registry, chunk)?);
        }
        data::store_data(&self.data_filepath(), &stripped)?;

        let digest_spec = self.get_full_spec_with_config(config);
        write_json_atomic(&self.digest_task_filepath(), &Value::Object(digest_spec))?;

        let mut stages = std::collections::BTreeMap::new();
        for stage in pipeline.stages() {
            stages.insert(stage.id().as_str().to_string(), stage.sha());
        }
        let sha_digest = ShaDigest::new(stages, self.compute_sha(Some(config))?);
        write_json_atomic(&self.digest_sha_filepath(), &serde_json::to_value(&sha_digest)?)?;

        let stage_ids: BTreeSet<String> = pipeline.stages().iter().map(|s| s.id().as_str().to_string()).collect();
        let input_ids: BTreeSet<String> = self.input_ids()?.into_iter().map(|id| id.as_str_repr()).collect();
        times.retain(&stage_ids, &input_ids);
        times.save(&self.times_filepath())?;
        Ok(())
    }

    /// Delete the three digest/data files, if present, so the task re-runs
    /// from scratch.
    pub fn reset(&self) -> Result<(), TaskError> {
        for path in [self.digest_sha_filepath(), self.digest_task_filepath(), self.data_filepath()] {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Run the pipeline for every input, picking up from a prior task
    /// unless `pickup` is `false`, storing the result, and returning the
    /// final task data.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        config: &Config,
        pipeline: &Pipeline,
        registry: &Registry,
        pickup: bool,
        strip_marginals_flag: bool,
        status: &Status,
        callbacks: Option<&dyn repro_core::TaskCallbacks>,
    ) -> Result<TaskData, TaskError> {
        if !self.runnable() {
            return Err(TaskError::NotRunnable(self.inner.path.clone()));
        }

        let (mut data, mut times, first_stage, pickup_task): (TaskData, Benchmark, Option<StageId>, Option<Task>) =
            if pickup {
                let info = self.find_pickup_task(pipeline, config)?;
                match info.task {
                    Some(task) => {
                        let loaded = task.load(Some((pipeline, registry)))?;
                        let mut times = Benchmark::new();
                        if task.times_filepath().is_file() {
                            times.adopt(&Benchmark::load(&task.times_filepath())?);
                        }
                        (loaded, times, info.first_diverging_stage, Some(task))
                    }
                    None => (TaskData::new(), Benchmark::new(), None, None),
                }
            } else {
                (TaskData::new(), Benchmark::new(), None, None)
            };
        let pickup_active = pickup_task.is_some();

        if let Some(pickup) = &pickup_task {
            tracing::debug!(
                task = %self.inner.path.display(),
                pickup = %pickup.path().display(),
                first_stage = first_stage.as_ref().map(|s| s.as_str()),
                "picking up prior task output"
            );
        } else {
            tracing::debug!(task = %self.inner.path.display(), "running with no pickup");
        }

        status.write(json!({
            "info": "start",
            "task": self.inner.path.to_string_lossy(),
            "pickup": pickup_task.as_ref().map(|t| t.path().to_string_lossy().to_string()),
            "first_stage": first_stage.as_ref().map(|s| s.as_str().to_string()),
        }));

        if !pickup_active || first_stage.is_some() {
            let input_ids = self.input_ids()?;
            let step_count = input_ids.len();
            for (step, input_id) in input_ids.iter().enumerate() {
                let input_status = status.derive();
                input_status.write(json!({
                    "info": "process",
                    "task": self.inner.path.to_string_lossy(),
                    "input_id": input_id,
                    "step": step,
                    "step_count": step_count,
                }));

                let input_config = pipeline.configure(config, input_id);
                let mut prior_chunk = data.get(input_id).cloned().unwrap_or_default();
                prior_chunk
                    .entry("input".to_string())
                    .or_insert_with(|| serde_json::json!(input_id));
                let first_stage_ref = first_stage.as_ref().map(|s| s.as_str());

                let (mut chunk, timings) = pipeline.process(
                    input_id,
                    &input_config,
                    first_stage_ref,
                    None,
                    prior_chunk,
                    &input_status,
                    callbacks,
                )?;

                if strip_marginals_flag {
                    chunk = self.strip_marginals(pipeline, registry, &chunk)?;
                }
                times.merge_timings(&timings, input_id);

                if pipeline.has_scope("config") {
                    let config_path = pipeline.resolve("config", input_id)?;
                    if let Some(parent) = config_path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&config_path, input_config.to_yaml_string())?;
                }

                data.insert(input_id.clone(), chunk);
            }
        }

        status.intermediate(Some(json!({"info": "storing", "intermediate": true})));
        self.store(pipeline, registry, &data, config, &mut times)?;
        tracing::info!(task = %self.inner.path.display(), inputs = data.len(), "task run complete");
        status.write(json!({"info": "completed", "task": self.inner.path.to_string_lossy()}));
        Ok(data)
    }
}

fn load_yaml_as_json(path: &Path) -> Result<Value, TaskError> {
    let text = std::fs::read_to_string(path)?;
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|source| TaskError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_value(yaml_value).map_err(|source| TaskError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json_atomic(path: &Path, value: &Value) -> Result<(), TaskError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, serde_json::to_vec(value)?)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
