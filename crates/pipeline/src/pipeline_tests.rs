// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use repro_core::{Config, NullStatusSink, PipelineData, StageError};
use serde_json::json;
use std::collections::BTreeSet;

type ProcessFn = Box<dyn Fn(&Config, &PipelineData) -> PipelineData + Send + Sync>;

struct ClosureStage {
    id: StageId,
    inputs: BTreeSet<String>,
    outputs: BTreeSet<String>,
    consumes: BTreeSet<String>,
    f: ProcessFn,
}

impl ClosureStage {
    fn new(
        id: &str,
        inputs: &[&str],
        outputs: &[&str],
        consumes: &[&str],
        f: impl Fn(&Config, &PipelineData) -> PipelineData + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: StageId::new(id),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            consumes: consumes.iter().map(|s| s.to_string()).collect(),
            f: Box::new(f),
        })
    }
}

impl Stage for ClosureStage {
    fn id(&self) -> StageId {
        self.id.clone()
    }
    fn inputs(&self) -> BTreeSet<String> {
        self.inputs.clone()
    }
    fn outputs(&self) -> BTreeSet<String> {
        self.outputs.clone()
    }
    fn consumes(&self) -> BTreeSet<String> {
        self.consumes.clone()
    }
    fn process(
        &self,
        config: &Config,
        _status: &dyn repro_core::StatusSink,
        inputs: &PipelineData,
    ) -> Result<PipelineData, StageError> {
        Ok((self.f)(config, inputs))
    }
}

fn s1() -> Arc<dyn Stage> {
    ClosureStage::new("s1", &["input"], &["a"], &[], |config, inputs| {
        let mut config = config.clone();
        let x1 = config.get("s1/x1", json!(1));
        let input = inputs.get("input").and_then(|v| v.as_i64()).unwrap_or(0);
        let mut out = PipelineData::new();
        out.insert("a".to_string(), json!(input * x1.as_i64().unwrap_or(1)));
        out
    })
}

fn s2() -> Arc<dyn Stage> {
    ClosureStage::new("s2", &["a"], &["b"], &[], |config, inputs| {
        let mut config = config.clone();
        let x2 = config.get("s2/x2", json!(0));
        let a = inputs.get("a").and_then(|v| v.as_i64()).unwrap_or(0);
        let mut out = PipelineData::new();
        out.insert("b".to_string(), json!(a + x2.as_i64().unwrap_or(0)));
        out
    })
}

fn s3() -> Arc<dyn Stage> {
    ClosureStage::new("s3", &["b"], &["c"], &[], |config, inputs| {
        let mut config = config.clone();
        let x3 = config.get("s3/x3", json!(1));
        let b = inputs.get("b").and_then(|v| v.as_i64()).unwrap_or(0);
        let mut out = PipelineData::new();
        out.insert("c".to_string(), json!(b * x3.as_i64().unwrap_or(1)));
        out
    })
}

fn build_pipeline() -> Pipeline {
    Pipeline::create(vec![s1(), s2(), s3()], IndexMap::new()).expect("valid pipeline")
}

fn config_with(x1: i64, x2: i64, x3: i64) -> Config {
    let mut config = Config::new();
    config.set("s1/x1", json!(x1));
    config.set("s2/x2", json!(x2));
    config.set("s3/x3", json!(x3));
    config
}

#[test]
fn create_orders_stages_topologically() {
    let pipeline = build_pipeline();
    assert_eq!(pipeline.find(&StageId::new("s1")), 0);
    assert_eq!(pipeline.find(&StageId::new("s2")), 1);
    assert_eq!(pipeline.find(&StageId::new("s3")), 2);
}

#[test]
fn create_rejects_duplicate_stage_ids() {
    let err = Pipeline::create(vec![s1(), s1()], IndexMap::new()).unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateStageId(_)));
}

#[test]
fn create_rejects_duplicate_outputs() {
    let dup = ClosureStage::new("dup", &["input"], &["a"], &[], |_, _| PipelineData::new());
    let err = Pipeline::create(vec![s1(), dup], IndexMap::new()).unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateOutput(_)));
}

#[test]
fn create_fails_when_inputs_cannot_be_satisfied() {
    let orphan = ClosureStage::new("orphan", &["missing"], &["z"], &[], |_, _| PipelineData::new());
    let err = Pipeline::create(vec![orphan], IndexMap::new()).unwrap_err();
    assert!(matches!(err, PipelineError::Unorderable));
}

// Scenario S1: linear pipeline, no pickup.
#[test]
fn s1_linear_pipeline_computes_expected_chain() {
    let pipeline = build_pipeline();
    let config = config_with(2, 3, 5);

    let mut input_value = PipelineData::new();
    input_value.insert("input".to_string(), json!(10));

    let (data, timings) = pipeline
        .process(&InputId::Int(1), &config, None, None, input_value, &NullStatusSink, None)
        .expect("process succeeds");

    assert_eq!(data.get("a"), Some(&json!(20)));
    assert_eq!(data.get("b"), Some(&json!(23)));
    assert_eq!(data.get("c"), Some(&json!(115)));
    assert_eq!(timings.len(), 3);
}

// Scenario S2: pick-up from ancestor, overriding s2/x2 and resuming at s2.
#[test]
fn s2_pickup_resumes_from_first_diverging_stage() {
    let pipeline = build_pipeline();
    let config = config_with(2, 0, 5);

    let mut prior_data = PipelineData::new();
    prior_data.insert("input".to_string(), json!(10));
    prior_data.insert("a".to_string(), json!(20));

    let (data, timings) = pipeline
        .process(&InputId::Int(1), &config, Some("s2"), None, prior_data, &NullStatusSink, None)
        .expect("process succeeds");

    assert_eq!(data.get("a"), Some(&json!(20)));
    assert_eq!(data.get("b"), Some(&json!(20)));
    assert_eq!(data.get("c"), Some(&json!(100)));
    // s1 was skipped (its output was already present), only s2/s3 ran.
    assert_eq!(timings.len(), 2);
    assert!(!timings.contains_key(&StageId::new("s1")));
}

#[test]
fn first_stage_at_pipeline_start_with_empty_data_is_normalized_away() {
    let pipeline = build_pipeline();
    let config = config_with(2, 3, 5);
    let mut input_value = PipelineData::new();
    input_value.insert("input".to_string(), json!(10));

    let (data, _timings) = pipeline
        .process(&InputId::Int(1), &config, Some("s1"), None, input_value, &NullStatusSink, None)
        .expect("normalizes first_stage away instead of erroring");
    assert_eq!(data.get("c"), Some(&json!(115)));
}

#[test]
fn first_stage_with_empty_data_elsewhere_is_an_error() {
    let pipeline = build_pipeline();
    let config = config_with(2, 3, 5);

    let err = pipeline
        .process(&InputId::Int(1), &config, Some("s2"), None, PipelineData::new(), &NullStatusSink, None)
        .unwrap_err();
    assert!(matches!(err, PipelineError::EmptyDataWithFirstStage));
}

#[test]
fn plus_suffix_resolves_to_the_stage_immediately_after() {
    let pipeline = build_pipeline();
    assert_eq!(pipeline.resolve_stage_ref("s1+").expect("resolves"), 1);
}

#[test]
fn persistent_fields_excludes_consumed_fields() {
    let consuming = ClosureStage::new("s2", &["a"], &["b"], &["a"], |_, inputs| {
        let mut out = PipelineData::new();
        out.insert("b".to_string(), inputs.get("a").cloned().unwrap_or(json!(0)));
        out
    });
    let pipeline = Pipeline::create(vec![s1(), consuming], IndexMap::new()).expect("valid");
    let fields = pipeline.persistent_fields();
    assert!(!fields.contains("a"));
    assert!(fields.contains("b"));
    assert!(fields.contains("input"));
}

#[test]
fn resolve_interpolates_scope_template() {
    let mut scopes = IndexMap::new();
    scopes.insert("image".to_string(), "/data/img-%s.png".to_string());
    let pipeline = Pipeline::create(vec![s1()], scopes).expect("valid");
    let path = pipeline.resolve("image", &InputId::Int(3)).expect("known scope");
    assert_eq!(path, std::path::PathBuf::from("/data/img-3.png"));
}

#[test]
fn append_rejects_duplicate_id() {
    let mut pipeline = build_pipeline();
    let err = pipeline.append(s1(), None).unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateAppend(_)));
}

#[test]
fn append_inserts_after_anchor() {
    let mut pipeline = Pipeline::create(vec![s1()], IndexMap::new()).expect("s1 alone is orderable");
    let extra = ClosureStage::new("extra", &["a"], &["z"], &[], |_, inputs| {
        let mut out = PipelineData::new();
        out.insert("z".to_string(), inputs.get("a").cloned().unwrap_or(json!(0)));
        out
    });
    pipeline.append(extra, Some(&StageId::new("s1"))).expect("inserts");
    assert_eq!(pipeline.find(&StageId::new("extra")), 1);
}

#[test]
fn disabled_stage_is_skipped_and_contributes_no_time() {
    let pipeline = build_pipeline();
    let mut config = config_with(2, 3, 5);
    config.set("s2/enabled", json!(false));

    let mut input_value = PipelineData::new();
    input_value.insert("input".to_string(), json!(10));

    let (data, timings) = pipeline
        .process(&InputId::Int(1), &config, None, None, input_value, &NullStatusSink, None)
        .expect("process succeeds even with a disabled stage");

    // s2 didn't run, so "b" is never produced; s3 runs but reads a missing "b" as absent.
    assert!(!timings.contains_key(&StageId::new("s2")));
    assert_eq!(data.get("a"), Some(&json!(20)));
}
