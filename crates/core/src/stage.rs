// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Stage` trait: one pipeline step with declared inputs/outputs/consumes,
//! a process contract, a signature hash, and callback hooks.

use crate::config::Config;
use crate::input_id::InputId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

crate::define_id! {
    /// A lowercase-hyphenated stage identifier (never ends in `+`).
    pub struct StageId;
}

/// Mapping from field name to value, produced during one pipeline run for
/// one input. Iteration order is preserved (insertion order), which keeps
/// `Task::store`'s on-disk representation stable across runs with the same
/// logical content.
pub type PipelineData = IndexMap<String, Value>;

/// Errors raised while driving a single stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage {stage} produced unexpected outputs: missing {missing:?}, unexpected {unexpected:?}")]
    OutputMismatch {
        stage: StageId,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("stage {stage} failed: {message}")]
    Failed { stage: StageId, message: String },
}

/// The three events a stage driver fires callbacks for. The synthetic
/// `after` event (see [`Stage::on_after`]) is registered for both `End` and
/// `Skip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageEvent {
    Start,
    End,
    Skip,
}

impl fmt::Display for StageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageEvent::Start => "start",
            StageEvent::End => "end",
            StageEvent::Skip => "skip",
        };
        write!(f, "{s}")
    }
}

/// A callback hook fired by the stage driver at `start`/`end`/`skip`.
pub type StageCallback = std::sync::Arc<dyn Fn(StageEvent, &StageId, &InputId, &Config) + Send + Sync>;

/// A coercion applied to an auto-derived hyperparameter after it is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureKind {
    Int,
    Float,
    Bool,
}

/// One auto-derived-hyperparameter rule returned by [`Stage::configure`].
///
/// For a rule registered under key `key`, the pipeline materializes two
/// config entries under the stage's namespace: `AF_<key>` defaults to
/// `default_user_factor` (if absent), and `<key>` defaults to
/// `factor * AF_<key>` (if absent), optionally coerced by `kind` and then
/// clipped to `[min, max]`.
#[derive(Debug, Clone)]
pub struct ConfigureRule {
    pub factor: f64,
    pub default_user_factor: Value,
    pub kind: Option<ConfigureKind>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ConfigureRule {
    pub fn new(factor: f64, default_user_factor: impl Into<Value>) -> Self {
        Self {
            factor,
            default_user_factor: default_user_factor.into(),
            kind: None,
            min: None,
            max: None,
        }
    }

    pub fn with_kind(mut self, kind: ConfigureKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }
}

/// A read-only view of the owning pipeline, passed to [`Stage::configure`]
/// so stages can reason about the overall field set without the `core`
/// crate depending on the `pipeline` crate that implements it.
pub trait PipelineView {
    /// `{"input"} ∪ ⋃ outputs` across every stage in the pipeline.
    fn fields(&self) -> BTreeSet<String>;

    /// The index of a stage by id, if present.
    fn stage_index(&self, id: &StageId) -> Option<usize>;
}

/// A sink that a stage driver reports status to, implemented by the
/// `status` crate's `Status` node. Kept as a trait here (rather than a
/// direct dependency) so `core` stays at the bottom of the crate graph.
pub trait StatusSink: Send + Sync {
    /// Append a permanent entry.
    fn write(&self, value: Value);

    /// Replace (or, with `None`, clear) the single intermediate slot.
    fn intermediate(&self, value: Option<Value>);
}

/// External hook invoked alongside a stage's own `on_start`/`on_end`/`on_skip`.
///
/// Mirrors `Task.on_<stage>_<event>` method dispatch from the original
/// implementation: rather than reflecting over method names, a caller
/// registers one callback sink that the pipeline driver consults for every
/// stage event, alongside whatever hooks the `Stage` impl itself defines.
pub trait TaskCallbacks: Send + Sync {
    fn on_stage_event(&self, stage: &StageId, event: StageEvent, input: &InputId, config: &Config);
}

/// A [`StatusSink`] that discards everything, for tests and dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn write(&self, _value: Value) {}
    fn intermediate(&self, _value: Option<Value>) {}
}

/// One pipeline step.
///
/// Implementors declare the three disjoint-in-purpose field sets
/// ([`Stage::inputs`], [`Stage::outputs`], [`Stage::consumes`]) and a
/// process contract: `process` must return exactly the declared `outputs`
/// keys, given exactly the declared `inputs` keys.
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    /// Fields required from prior stages (including `consumes`).
    fn inputs(&self) -> BTreeSet<String>;

    /// Fields produced by this stage.
    fn outputs(&self) -> BTreeSet<String>;

    /// Subset of `inputs` removed from the pipeline data after this stage runs.
    fn consumes(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Whether the stage runs when `config` is silent about `enabled`.
    fn enabled_by_default(&self) -> bool {
        true
    }

    /// Extra JSON-serializable attributes folded into [`Stage::signature`].
    /// Override to expose version numbers or other change detectors: the
    /// target language has no stable bytecode handle to hash, so a bumped
    /// integer here is the substitute the design notes call for.
    fn attributes(&self) -> Value {
        Value::Null
    }

    /// Run the stage's computation. `inputs` carries exactly the declared
    /// `inputs` keys; the returned map must carry exactly the declared
    /// `outputs` keys.
    fn process(
        &self,
        config: &Config,
        status: &dyn StatusSink,
        inputs: &PipelineData,
    ) -> Result<PipelineData, StageError>;

    /// Auto-derived hyperparameter rules for a given input.
    fn configure(&self, _pipeline: &dyn PipelineView, _input: &InputId) -> IndexMap<String, ConfigureRule> {
        IndexMap::new()
    }

    fn on_start(&self, _input: &InputId, _config: &Config) {}

    /// Default fires the synthetic `after` hook; override to customize
    /// while still calling [`Stage::on_after`] if that behavior is wanted.
    fn on_end(&self, input: &InputId, config: &Config) {
        self.on_after(input, config);
    }

    fn on_skip(&self, input: &InputId, config: &Config) {
        self.on_after(input, config);
    }

    /// The synthetic `after` event: registered for both `end` and `skip`.
    fn on_after(&self, _input: &InputId, _config: &Config) {}

    /// All public attributes folded into a stable digest: `inputs`,
    /// `outputs`, `consumes` are sorted for canonical ordering.
    fn signature(&self) -> Value {
        json!({
            "id": self.id().as_str(),
            "inputs": sorted(self.inputs()),
            "outputs": sorted(self.outputs()),
            "consumes": sorted(self.consumes()),
            "enabled_by_default": self.enabled_by_default(),
            "attributes": self.attributes(),
        })
    }

    /// SHA-1 hex digest of the canonical JSON of [`Stage::signature`].
    fn sha(&self) -> String {
        let canonical = serde_json::to_string(&self.signature()).unwrap_or_default();
        let mut hasher = Sha1::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn sorted(set: BTreeSet<String>) -> Vec<String> {
    set.into_iter().collect()
}

/// Outcome of driving a single stage through [`run_stage`]/[`skip_stage`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StageOutcome {
    /// Wall time in seconds. Zero for a skipped stage.
    pub elapsed_secs: f64,
    pub skipped: bool,
}

/// Derive a stage id from a class-name-like label: split camel/digit runs,
/// lowercase, hyphen-join, and drop a trailing `stage` token.
///
/// Mirrors the fallback in `repype.stage.Stage` for stages that don't
/// declare an explicit `id`.
pub fn derive_stage_id(label: &str) -> StageId {
    let chars: Vec<char> = label.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    for (i, &ch) in chars.iter().enumerate() {
        let boundary = if i == 0 {
            false
        } else {
            let prev = chars[i - 1];
            let next = chars.get(i + 1).copied();
            (ch.is_uppercase() && (prev.is_lowercase() || prev.is_ascii_digit()))
                || (ch.is_uppercase()
                    && prev.is_uppercase()
                    && next.map(|n| n.is_lowercase()).unwrap_or(false))
                || (ch.is_ascii_digit() && !prev.is_ascii_digit())
                || (!ch.is_ascii_digit() && ch.is_alphabetic() && prev.is_ascii_digit())
        };
        if boundary && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        words.push(current);
    }

    let mut words: Vec<String> = words
        .into_iter()
        .map(|w| w.to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();

    if words.last().map(|w| w == "stage").unwrap_or(false) && words.len() > 1 {
        words.pop();
    }

    let joined = words.join("-");
    StageId::new(joined.trim_end_matches('+').to_string())
}

#[cfg(test)]
#[path = "stage_tests.rs"]
mod tests;
