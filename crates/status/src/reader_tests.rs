// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::status::Status;
use serde_json::json;

fn reader_for(status: &Status) -> StatusReader {
    StatusReader::without_watch(status.root_dir(), status.file_name())
}

#[test]
fn permanent_writes_are_observed_in_order() {
    let (status, _dir) = Status::create_temp().expect("create");
    status.write(json!({"info": "start"}));
    status.write(json!({"info": "completed"}));

    let mut reader = reader_for(&status);
    let events = reader.tick();
    assert_eq!(
        events,
        vec![
            ReaderEvent::Permanent(json!({"info": "start"})),
            ReaderEvent::Permanent(json!({"info": "completed"})),
        ]
    );
    // A second tick with nothing new observes nothing new.
    assert_eq!(reader.tick(), vec![]);
}

#[test]
fn child_entries_are_observed_after_parent_entries_in_document_order() {
    let (status, _dir) = Status::create_temp().expect("create");
    status.write(json!({"info": "enter"}));
    let child = status.derive();
    child.write(json!({"info": "child-event"}));
    status.write(json!({"info": "completed"}));

    let mut reader = reader_for(&status);
    let events = reader.tick();
    assert_eq!(
        events,
        vec![
            ReaderEvent::Permanent(json!({"info": "enter"})),
            ReaderEvent::Permanent(json!({"info": "child-event"})),
            ReaderEvent::Permanent(json!({"info": "completed"})),
        ]
    );
}

#[test]
fn intermediate_updates_are_observed_and_reparked() {
    let (status, _dir) = Status::create_temp().expect("create");
    status.intermediate(Some(json!({"info": "progress", "step": 1})));

    let mut reader = reader_for(&status);
    assert_eq!(
        reader.tick(),
        vec![ReaderEvent::Intermediate(json!({"info": "progress", "step": 1}))]
    );

    status.intermediate(Some(json!({"info": "progress", "step": 2})));
    assert_eq!(
        reader.tick(),
        vec![ReaderEvent::Intermediate(json!({"info": "progress", "step": 2}))]
    );

    status.intermediate(None);
    assert_eq!(reader.tick(), vec![ReaderEvent::IntermediateCleared]);
}

#[test]
fn an_intermediate_left_live_in_a_child_does_not_stall_a_later_sibling_permanent() {
    let (status, _dir) = Status::create_temp().expect("create");
    let child = status.derive();
    child.intermediate(Some(json!({"info": "progress", "step": 1})));
    status.write(json!({"info": "completed"}));

    let mut reader = reader_for(&status);
    assert_eq!(
        reader.tick(),
        vec![
            ReaderEvent::Intermediate(json!({"info": "progress", "step": 1})),
            ReaderEvent::IntermediateCleared,
            ReaderEvent::Permanent(json!({"info": "completed"})),
        ]
    );
}

#[test]
fn absent_child_file_is_treated_as_empty_without_error() {
    let (status, dir) = Status::create_temp().expect("create");
    let child = status.derive();
    // Delete the child's file before the reader ever sees it, simulating
    // a parent `{"expand": child}` entry observed before the child write.
    std::fs::remove_file(child.path()).expect("remove child file");
    let _ = &dir;

    let mut reader = reader_for(&status);
    assert_eq!(reader.tick(), vec![]);
}

#[test]
fn a_permanent_write_right_after_clearing_the_intermediate_emits_both() {
    let (status, _dir) = Status::create_temp().expect("create");
    status.intermediate(Some(json!({"info": "progress"})));

    let mut reader = reader_for(&status);
    assert_eq!(
        reader.tick(),
        vec![ReaderEvent::Intermediate(json!({"info": "progress"}))]
    );

    // Status::write clears the intermediate pointer and appends a
    // permanent entry in the same update.
    status.write(json!({"info": "completed"}));
    assert_eq!(
        reader.tick(),
        vec![
            ReaderEvent::IntermediateCleared,
            ReaderEvent::Permanent(json!({"info": "completed"})),
        ]
    );
}
