// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dynamic dispatch for pipeline and stage factories.
//!
//! The original implementation resolves a dotted module path (`"a.b.C"`)
//! from a task spec string via its host language's module loader. This
//! target has no equivalent runtime reflection, so per the design notes a
//! spec identifier is instead looked up in a registry of constructor
//! functions that the embedder populates ahead of time; a spec that names
//! an unregistered identifier fails at load, not at run.

use crate::error::TaskError;
use indexmap::IndexMap;
use repro_core::{Stage, StageId};
use repro_pipeline::Pipeline;
use std::collections::HashMap;
use std::sync::Arc;

pub type StageFactory = Arc<dyn Fn() -> Arc<dyn Stage> + Send + Sync>;
pub type PipelineFactory = Arc<dyn Fn(IndexMap<String, String>) -> Result<Pipeline, TaskError> + Send + Sync>;

/// A table mapping spec-level identifiers to constructors, resolved at
/// task-load time. One registry is typically shared across an entire batch.
#[derive(Clone, Default)]
pub struct Registry {
    stages: HashMap<String, StageFactory>,
    pipelines: HashMap<String, PipelineFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage constructor under `name` (typically the stage's own
    /// id, but any identifier a `task.yml` might reference works).
    pub fn register_stage(&mut self, name: impl Into<String>, factory: StageFactory) -> &mut Self {
        self.stages.insert(name.into(), factory);
        self
    }

    /// Register a pipeline factory under `name`, used for a `pipeline`
    /// field that names a single pre-composed pipeline rather than a list
    /// of stages to order.
    pub fn register_pipeline(&mut self, name: impl Into<String>, factory: PipelineFactory) -> &mut Self {
        self.pipelines.insert(name.into(), factory);
        self
    }

    pub fn construct_stage(&self, name: &str) -> Result<Arc<dyn Stage>, TaskError> {
        let factory = self.stages.get(name).ok_or_else(|| TaskError::UnknownFactory(name.to_string()))?;
        Ok(factory())
    }

    pub fn construct_pipeline(&self, name: &str, scopes: IndexMap<String, String>) -> Result<Pipeline, TaskError> {
        let factory = self
            .pipelines
            .get(name)
            .ok_or_else(|| TaskError::UnknownFactory(name.to_string()))?;
        factory(scopes)
    }

    /// Resolve a `marginal_stages` entry: a dotted identifier is looked up
    /// in the registry and its constructed stage's id used; anything else
    /// is taken as a literal stage id.
    pub fn resolve_stage_id(&self, spec: &str) -> Result<StageId, TaskError> {
        if spec.contains('.') {
            Ok(self.construct_stage(spec)?.id())
        } else {
            Ok(StageId::new(spec))
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
