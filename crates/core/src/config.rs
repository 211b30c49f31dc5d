// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hierarchical hyperparameter container.
//!
//! A [`Config`] is the single currency exchanged between tasks, stages and
//! digests: its [`Config::sha`] seals the identity of a run. Nested levels
//! are addressed with slash-delimited keys (`"stage/param"`), mirroring
//! `repype.config.Config` from the original Python implementation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use std::fmt;

/// A nested mapping of string keys to JSON-serializable hyperparameter values.
///
/// Equality and [`Config::sha`] are pure functions of [`Config::entries`];
/// `serde_json::Map` keeps entries in sorted (`BTreeMap`) order by default,
/// so JSON serialization is already canonical.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    entries: Map<String, Value>,
}

impl Config {
    /// Create a blank configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing JSON object as a configuration (no copying occurs).
    pub fn from_map(entries: Map<String, Value>) -> Self {
        Self { entries }
    }

    /// Wrap an arbitrary JSON value, which must be an object (or null, treated as empty).
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from_map(map),
            Value::Null => Self::new(),
            other => {
                let mut map = Map::new();
                if let Value::Object(inner) = other {
                    map = inner;
                }
                Self::from_map(map)
            }
        }
    }

    /// The underlying entries.
    pub fn entries(&self) -> &Map<String, Value> {
        &self.entries
    }

    /// Mutable access to the underlying entries.
    pub fn entries_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.entries
    }

    fn cleanup_value(value: Value) -> Value {
        // `Config` values are already plain JSON; nothing to unwrap, kept as a
        // named step to mirror `_cleanup_value` in the original.
        value
    }

    /// Returns the value of a hyperparameter, or `default` if unset.
    ///
    /// Like the original, a missing intermediate mapping is created along the
    /// way, so repeated calls with the same default are idempotent.
    pub fn get(&mut self, key: &str, default: Value) -> Value {
        if let Some((head, rest)) = split_once(key) {
            let child = self.get(head, Value::Object(Map::new()));
            let mut child_config = Config::from_value(child);
            let value = child_config.get(rest, default);
            self.entries
                .insert(head.to_string(), Value::Object(child_config.entries));
            value
        } else {
            if !self.entries.contains_key(key) {
                self.entries
                    .insert(key.to_string(), Self::cleanup_value(default));
            }
            self.entries.get(key).cloned().unwrap_or(Value::Null)
        }
    }

    /// Returns the value of a hyperparameter without mutating the config.
    pub fn get_opt(&self, key: &str) -> Option<&Value> {
        if let Some((head, rest)) = split_once(key) {
            let child = self.entries.get(head)?.as_object()?;
            return get_opt_map(child, rest);
        }
        self.entries.get(key)
    }

    /// `true` if the hyperparameter `key` is set.
    pub fn contains(&self, key: &str) -> bool {
        self.get_opt(key).is_some()
    }

    /// Sets a hyperparameter if it is not set yet (or if it is `null` and
    /// `override_none` is `true`). Returns the new or unmodified value.
    pub fn set_default(&mut self, key: &str, default: Value, override_none: bool) -> Value {
        if let Some((head, rest)) = split_once(key) {
            let child = self.get(head, Value::Object(Map::new()));
            let mut child_config = Config::from_value(child);
            let value = child_config.set_default(rest, default, override_none);
            self.entries
                .insert(head.to_string(), Value::Object(child_config.entries));
            value
        } else {
            let is_none = matches!(self.entries.get(key), Some(Value::Null));
            if !self.entries.contains_key(key) || (override_none && is_none) {
                self.entries
                    .insert(key.to_string(), Self::cleanup_value(default));
            }
            self.entries.get(key).cloned().unwrap_or(Value::Null)
        }
    }

    /// Removes a hyperparameter, returning its value or `default`.
    pub fn pop(&mut self, key: &str, default: Value) -> Value {
        if let Some((head, rest)) = split_once(key) {
            let child = self.get(head, Value::Object(Map::new()));
            let mut child_config = Config::from_value(child);
            let value = child_config.pop(rest, default);
            self.entries
                .insert(head.to_string(), Value::Object(child_config.entries));
            value
        } else {
            self.entries.remove(key).unwrap_or(default)
        }
    }

    /// Updates a hyperparameter by mapping its previous value (or `null`) to a new value.
    pub fn update(&mut self, key: &str, func: impl FnOnce(Value) -> Value) -> Value {
        if let Some((head, rest)) = split_once(key) {
            let child = self.get(head, Value::Object(Map::new()));
            let mut child_config = Config::from_value(child);
            let value = child_config.update(rest, func);
            self.entries
                .insert(head.to_string(), Value::Object(child_config.entries));
            value
        } else {
            let previous = self.entries.get(key).cloned().unwrap_or(Value::Null);
            let new_value = Self::cleanup_value(func(previous));
            self.entries.insert(key.to_string(), new_value.clone());
            new_value
        }
    }

    /// Sets the value of a hyperparameter.
    pub fn set(&mut self, key: &str, value: Value) {
        self.update(key, |_| value);
    }

    /// Right-wins deep merge of `other` into `self`. Non-map values overwrite maps.
    pub fn merge(&mut self, other: &Config) -> &mut Self {
        for (key, val) in other.entries.iter() {
            match val {
                Value::Object(sub) => {
                    let child = self.get(key, Value::Object(Map::new()));
                    let mut child_config = Config::from_value(child);
                    child_config.merge(&Config::from_map(sub.clone()));
                    self.entries
                        .insert(key.clone(), Value::Object(child_config.entries));
                }
                other_val => {
                    self.entries.insert(key.clone(), other_val.clone());
                }
            }
        }
        self
    }

    /// A deep, structurally independent copy.
    pub fn copy(&self) -> Config {
        self.clone()
    }

    /// SHA-1 hex digest of the canonical JSON serialization of [`Config::entries`].
    pub fn sha(&self) -> String {
        // `serde_json::to_string` only fails on a non-finite float or a
        // non-string map key; neither can reach a `Config` built through its
        // own API, but unlike the `Map<String, Value>` shape that guarantee
        // isn't enforced by the type, so fall back rather than risk a panic
        // on a value smuggled in via `from_value`/`merge`.
        let canonical = serde_json::to_string(&self.entries).unwrap_or_else(|_| "{}".to_string());
        let mut hasher = Sha1::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// A readable, YAML-ish rendering of the entries (for diagnostics, not a codec).
    pub fn to_yaml_string(&self) -> String {
        let mut lines = Vec::new();
        render_yaml(&self.entries, 0, &mut lines);
        lines.join("\n")
    }
}

fn render_yaml(map: &Map<String, Value>, indent: usize, lines: &mut Vec<String>) {
    let prefix = "  ".repeat(indent);
    for (key, value) in map.iter() {
        match value {
            Value::Object(sub) => {
                lines.push(format!("{prefix}{key}:"));
                render_yaml(sub, indent + 1, lines);
            }
            other => lines.push(format!("{prefix}{key}: {other}")),
        }
    }
}

fn get_opt_map<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some((head, rest)) = split_once(key) {
        let child = map.get(head)?.as_object()?;
        get_opt_map(child, rest)
    } else {
        map.get(key)
    }
}

fn split_once(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pretty = serde_json::to_string_pretty(&self.entries).unwrap_or_default();
        write!(f, "{pretty}")
    }
}

impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for Config {}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
