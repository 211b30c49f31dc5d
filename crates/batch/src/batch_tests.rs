// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use repro_status::Status;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

fn write_task_yml(dir: &Path, contents: &str) {
    std::fs::create_dir_all(dir).expect("create task dir");
    std::fs::write(dir.join("task.yml"), contents).expect("write task.yml");
}

#[test]
fn load_instantiates_every_task_yml_under_root() {
    let root = tempdir().expect("tempdir");
    write_task_yml(root.path(), "runnable: false\n");
    write_task_yml(&root.path().join("child"), "runnable: true\ninput_ids: [1]\n");

    let batch = Batch::load(root.path()).expect("load");
    assert_eq!(batch.tasks().len(), 2);
}

#[test]
fn task_caches_by_canonical_path_and_resolves_nearest_ancestor() {
    let root = tempdir().expect("tempdir");
    write_task_yml(root.path(), "config:\n  a: 1\n");
    write_task_yml(&root.path().join("mid"), "");
    write_task_yml(&root.path().join("mid/leaf"), "runnable: true\ninput_ids: [1]\n");

    let batch = Batch::load(root.path()).expect("load");
    let leaf = batch.task(root.path().join("mid/leaf"), None).expect("leaf");
    let parent = leaf.parent().expect("has a parent");
    assert_eq!(parent.path(), root.path().join("mid"));
    let grandparent = parent.parent().expect("has a grandparent");
    assert_eq!(grandparent.path(), root.path());

    let same_leaf_again = batch.task(root.path().join("mid/leaf"), None).expect("cached");
    assert_eq!(same_leaf_again.path(), leaf.path());
}

#[test]
fn task_with_conflicting_explicit_spec_is_an_error() {
    let root = tempdir().expect("tempdir");
    write_task_yml(root.path(), "runnable: true\n");
    let batch = Batch::new(root.path()).expect("new");
    batch.task(root.path(), None).expect("first load");

    let mut conflicting = RawSpec::new();
    conflicting.insert("runnable".to_string(), serde_json::json!(false));
    let err = batch.task(root.path(), Some(conflicting)).unwrap_err();
    assert!(matches!(err, BatchError::SpecMismatch(_)));
}

#[test]
fn pending_only_includes_runnable_tasks_with_no_stored_digest() {
    let root = tempdir().expect("tempdir");
    write_task_yml(
        root.path(),
        "runnable: true\npipeline: [double]\ninput_ids: [1]\nconfig:\n  double:\n    factor: 2\n",
    );
    write_task_yml(&root.path().join("sibling"), "runnable: false\n");

    let mut registry = Registry::new();
    registry.register_stage("double", Arc::new(double_stage_factory));

    let batch = Batch::load(root.path()).expect("load");
    let pending = batch.pending(&registry).expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task.path(), root.path());
}

#[test]
fn contexts_eagerly_snapshot_pipeline_and_config() {
    let root = tempdir().expect("tempdir");
    write_task_yml(
        root.path(),
        "runnable: true\npipeline: [double]\ninput_ids: [1]\nconfig:\n  double:\n    factor: 2\n",
    );

    let mut registry = Registry::new();
    registry.register_stage("double", Arc::new(double_stage_factory));

    let batch = Batch::load(root.path()).expect("load");
    let contexts = batch.contexts(&registry).expect("contexts");
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].pipeline.stages().len(), 1);
    assert_eq!(contexts[0].config.get_opt("double/factor"), Some(&serde_json::json!(2)));
}

fn double_stage_factory() -> Arc<dyn repro_core::Stage> {
    struct DoubleStage;
    impl repro_core::Stage for DoubleStage {
        fn id(&self) -> repro_core::StageId {
            repro_core::StageId::new("double")
        }
        fn inputs(&self) -> std::collections::BTreeSet<String> {
            ["input".to_string()].into_iter().collect()
        }
        fn outputs(&self) -> std::collections::BTreeSet<String> {
            ["doubled".to_string()].into_iter().collect()
        }
        fn process(
            &self,
            _config: &Config,
            _status: &dyn repro_core::StatusSink,
            inputs: &repro_core::PipelineData,
        ) -> Result<repro_core::PipelineData, repro_core::StageError> {
            let mut out = repro_core::PipelineData::new();
            let input = inputs.get("input").and_then(|v| v.as_i64()).unwrap_or(0);
            out.insert("doubled".to_string(), serde_json::json!(input * 2));
            Ok(out)
        }
    }
    Arc::new(DoubleStage)
}

/// A [`ChildCommand`] that counts invocations and always runs a trivial
/// shell command, used to drive [`Batch::run`] without a real re-exec
/// binary.
struct CountingSpawner {
    calls: AtomicUsize,
    succeed: bool,
}

impl ChildCommand for CountingSpawner {
    fn build(&self, _task_path: &Path, _status_root: &Path, _status_file: &str) -> Command {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Command::new(if self.succeed { "true" } else { "false" })
    }
}

fn contexts_for(root: &Path, registry: &Registry, count: usize) -> Vec<RunContext> {
    let batch = Batch::new(root).expect("new");
    (0..count)
        .map(|i| {
            let dir = root.join(format!("t{i}"));
            write_task_yml(&dir, "runnable: true\npipeline: [double]\ninput_ids: [1]\n");
            let task = batch.task(&dir, None).expect("task");
            RunContext {
                pipeline: task.create_pipeline(registry).expect("pipeline"),
                config: task.create_config().expect("config"),
                task,
            }
        })
        .collect()
}

#[test]
fn run_executes_every_context_in_order_and_reports_success() {
    let root = tempdir().expect("tempdir");
    let mut registry = Registry::new();
    registry.register_stage("double", Arc::new(double_stage_factory));
    let contexts = contexts_for(root.path(), &registry, 3);

    let (status, _dir) = Status::create_temp().expect("status");
    let spawner = CountingSpawner {
        calls: AtomicUsize::new(0),
        succeed: true,
    };

    let batch = Batch::new(root.path()).expect("new");
    let ok = batch.run(&contexts, &status, &spawner).expect("run");
    assert!(ok);
    assert_eq!(spawner.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn run_halts_the_batch_and_reports_interrupted_on_first_failure() {
    let root = tempdir().expect("tempdir");
    let mut registry = Registry::new();
    registry.register_stage("double", Arc::new(double_stage_factory));
    let contexts = contexts_for(root.path(), &registry, 3);

    let (status, dir) = Status::create_temp().expect("status");
    let spawner = CountingSpawner {
        calls: AtomicUsize::new(0),
        succeed: false,
    };

    let batch = Batch::new(root.path()).expect("new");
    let ok = batch.run(&contexts, &status, &spawner).expect("run");
    assert!(!ok);
    // Only the first context's child is spawned before the batch halts.
    assert_eq!(spawner.calls.load(Ordering::SeqCst), 1);

    let root_file = dir.path().join(status.file_name());
    let content = std::fs::read_to_string(root_file).expect("read status file");
    let entries: Vec<serde_json::Value> = serde_json::from_str(&content).expect("parse");
    let infos: Vec<&str> = entries.iter().filter_map(|e| e.get("info").and_then(|v| v.as_str())).collect();
    assert_eq!(infos, vec!["enter", "interrupted"]);
}
