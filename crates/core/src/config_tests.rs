// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn get_sets_default_when_missing() {
    let mut config = Config::new();
    let value = config.get("stage1/param1", json!(1000));
    assert_eq!(value, json!(1000));
    assert_eq!(config.get("stage1/param1", json!(0)), json!(1000));
}

#[test]
fn nested_keys_create_intermediate_maps() {
    let mut config = Config::new();
    config.set("stage1/sub/param1", json!("xyz"));
    assert_eq!(config.get_opt("stage1/sub/param1"), Some(&json!("xyz")));
    assert!(config.entries()["stage1"].is_object());
}

#[test]
fn set_default_does_not_override_existing() {
    let mut config = Config::new();
    config.set("x", json!(1));
    config.set_default("x", json!(2), false);
    assert_eq!(config.get_opt("x"), Some(&json!(1)));
}

#[test]
fn set_default_override_none() {
    let mut config = Config::new();
    config.set("x", Value::Null);
    config.set_default("x", json!(5), true);
    assert_eq!(config.get_opt("x"), Some(&json!(5)));
}

#[test]
fn pop_removes_and_returns() {
    let mut config = Config::new();
    config.set("a/b", json!(7));
    assert_eq!(config.pop("a/b", json!(0)), json!(7));
    assert_eq!(config.get_opt("a/b"), None);
    assert_eq!(config.pop("a/b", json!(0)), json!(0));
}

#[test]
fn copy_is_value_equal_and_independent() {
    let mut config = Config::new();
    config.set("x/y", json!(1));
    let mut copy = config.copy();
    assert_eq!(config, copy);
    copy.set("x/y", json!(2));
    assert_ne!(config, copy);
}

#[test]
fn merge_is_right_wins_and_idempotent() {
    let mut a = Config::new();
    a.set("x", json!(1));
    a.set("y/z", json!(1));

    let mut b = Config::new();
    b.set("x", json!(2));
    b.set("y/w", json!(3));

    let mut once = a.clone();
    once.merge(&b);
    assert_eq!(once.get_opt("x"), Some(&json!(2)));
    assert_eq!(once.get_opt("y/z"), Some(&json!(1)));
    assert_eq!(once.get_opt("y/w"), Some(&json!(3)));

    let mut twice = once.clone();
    twice.merge(&b);
    assert_eq!(once, twice);
}

#[test]
fn sha_depends_only_on_entries() {
    let mut a = Config::new();
    a.set("b", json!(1));
    a.set("a", json!(2));

    let mut b = Config::new();
    b.set("a", json!(2));
    b.set("b", json!(1));

    assert_eq!(a.sha(), b.sha());
}

#[test]
fn sha_changes_with_entries() {
    let mut a = Config::new();
    a.set("a", json!(1));
    let mut b = a.clone();
    b.set("a", json!(2));
    assert_ne!(a.sha(), b.sha());
}

#[yare::parameterized(
    flat = { "key", json!(1), "key: 1" },
)]
fn to_yaml_string_renders_leaves(key: &str, value: Value, expected_line: &str) {
    let mut config = Config::new();
    config.set(key, value);
    assert_eq!(config.to_yaml_string(), expected_line);
}

#[test]
fn to_yaml_string_renders_nested() {
    let mut config = Config::new();
    config.set("stage1/param1", json!(1000));
    assert_eq!(config.to_yaml_string(), "stage1:\n  param1: 1000");
}
