// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn read_entries(status: &Status) -> Vec<Value> {
    let content = fs::read_to_string(status.path()).expect("status file exists");
    serde_json::from_str(&content).expect("valid json array")
}

#[test]
fn write_appends_permanent_entries() {
    let (status, _dir) = Status::create_temp().expect("create");
    status.write(json!({"info": "start"}));
    status.write(json!({"info": "completed"}));
    let entries = read_entries(&status);
    assert_eq!(entries, vec![json!({"info": "start"}), json!({"info": "completed"})]);
}

#[test]
fn intermediate_creates_a_pointer_and_overwrites_in_place() {
    let (status, _dir) = Status::create_temp().expect("create");
    status.intermediate(Some(json!({"info": "progress", "step": 1})));
    let entries = read_entries(&status);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["content_type"], json!("intermediate"));
    let child_name = entries[0]["expand"].as_str().expect("expand path").to_string();

    status.intermediate(Some(json!({"info": "progress", "step": 2})));
    let entries_after = read_entries(&status);
    assert_eq!(entries_after.len(), 1, "overwriting does not append a new pointer");
    assert_eq!(entries_after[0]["expand"].as_str(), Some(child_name.as_str()));

    let child_path = status.root_dir().join(&child_name);
    let child_content = fs::read_to_string(child_path).expect("child file exists");
    let child_entries: Vec<Value> = serde_json::from_str(&child_content).expect("valid json");
    assert_eq!(child_entries, vec![json!({"info": "progress", "step": 2})]);
}

#[test]
fn intermediate_none_clears_the_pointer() {
    let (status, _dir) = Status::create_temp().expect("create");
    status.intermediate(Some(json!({"info": "progress"})));
    status.intermediate(None);
    let entries = read_entries(&status);
    assert!(entries.is_empty());
}

#[test]
fn write_clears_any_active_intermediate_first() {
    let (status, _dir) = Status::create_temp().expect("create");
    status.intermediate(Some(json!({"info": "progress"})));
    status.write(json!({"info": "completed"}));
    let entries = read_entries(&status);
    assert_eq!(entries, vec![json!({"info": "completed"})]);
}

#[test]
fn derive_links_a_plain_child_pointer() {
    let (status, _dir) = Status::create_temp().expect("create");
    let child = status.derive();
    child.write(json!({"info": "child-event"}));

    let entries = read_entries(&status);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].get("content_type").is_none());
    assert_eq!(entries[0]["expand"].as_str(), Some(child.file_name()));
}

#[test]
fn progress_emits_intermediate_per_step_and_clears_on_drop() {
    let (status, _dir) = Status::create_temp().expect("create");
    {
        let mut iter = status.progress(vec![10, 20, 30], 3, json!({"label": "x"}));
        assert_eq!(iter.next(), Some(10));
        let entries = read_entries(&status);
        assert_eq!(entries[0]["info"], json!("progress"));
        assert_eq!(entries[0]["step"], json!(1));
        assert_eq!(iter.next(), Some(20));
        assert_eq!(iter.next(), Some(30));
        assert_eq!(iter.next(), None);
    }
    let entries = read_entries(&status);
    assert!(entries.is_empty(), "intermediate cleared once the iterator is dropped");
}

#[test]
fn attach_preserves_content_written_before_hand_off_and_continues_appending() {
    let (status, _dir) = Status::create_temp().expect("create");
    let child = status.derive();
    child.write(json!({"info": "start"}));

    let reattached = Status::attach(status.root_dir(), child.file_name());
    reattached.write(json!({"info": "completed"}));

    let entries = read_entries(&reattached);
    assert_eq!(entries, vec![json!({"info": "start"}), json!({"info": "completed"})]);
}

#[test]
fn progress_clears_intermediate_even_on_early_drop() {
    let (status, _dir) = Status::create_temp().expect("create");
    {
        let mut iter = status.progress(vec![1, 2, 3], 3, Value::Null);
        assert_eq!(iter.next(), Some(1));
        // dropped here without reaching the end
    }
    let entries = read_entries(&status);
    assert!(entries.is_empty());
}
