// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use repro_core::InputId;
use serde_json::json;
use tempfile::tempdir;

#[test]
fn stored_data_round_trips_through_gzip_json() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("data.dill.gz");

    let mut data: TaskData = IndexMap::new();
    let mut chunk = PipelineData::new();
    chunk.insert("a".to_string(), json!(1));
    chunk.insert("b".to_string(), json!("x"));
    data.insert(InputId::Int(1), chunk);

    store_data(&path, &data).expect("store");
    assert!(path.is_file());

    let loaded = load_data(&path).expect("load");
    assert_eq!(loaded, data);
}

#[test]
fn store_creates_missing_parent_directories() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nested/sub/data.dill.gz");
    store_data(&path, &TaskData::new()).expect("store");
    assert!(path.is_file());
}

#[test]
fn store_leaves_no_tmp_file_behind() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("data.dill.gz");
    store_data(&path, &TaskData::new()).expect("store");
    assert!(!path.with_extension("gz.tmp").exists());
}
