// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `StatusReader`: watches a status tree on disk, reconstructs an in-memory
//! view, and emits permanent and intermediate events in document order.

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// An event delivered by [`StatusReader::tick`] / [`StatusReader::watch_blocking`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    /// A permanent entry, emitted exactly once, in document order.
    Permanent(Value),
    /// The single intermediate slot took on a new value.
    Intermediate(Value),
    /// The intermediate slot at the cursor's position was cleared.
    IntermediateCleared,
}

enum Slot {
    Permanent(Value),
    Intermediate(Option<Value>),
}

/// Watches a status tree rooted at `root_file` inside `root_dir`.
pub struct StatusReader {
    root_dir: PathBuf,
    root_file: String,
    last_hash: HashMap<String, String>,
    last_good: HashMap<String, Vec<Value>>,
    cursor: usize,
    last_intermediate: Option<Value>,
    _watcher: Option<RecommendedWatcher>,
    rx: Option<mpsc::Receiver<()>>,
}

impl StatusReader {
    /// Mount a filesystem watcher on `root_dir` and prepare to read the
    /// tree rooted at `root_file` (the root `Status` node's file name).
    pub fn new(root_dir: impl Into<PathBuf>, root_file: impl Into<String>) -> Result<StatusReader, ReaderError> {
        let root_dir = root_dir.into();
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if res.is_ok() {
                let _ = tx.send(());
            }
        })?;
        watcher.watch(&root_dir, RecursiveMode::NonRecursive)?;

        Ok(StatusReader {
            root_dir,
            root_file: root_file.into(),
            last_hash: HashMap::new(),
            last_good: HashMap::new(),
            cursor: 0,
            last_intermediate: None,
            _watcher: Some(watcher),
            rx: Some(rx),
        })
    }

    /// A reader with no filesystem watcher, useful for tests that drive
    /// [`StatusReader::tick`] directly after each write.
    pub fn without_watch(root_dir: impl Into<PathBuf>, root_file: impl Into<String>) -> StatusReader {
        StatusReader {
            root_dir: root_dir.into(),
            root_file: root_file.into(),
            last_hash: HashMap::new(),
            last_good: HashMap::new(),
            cursor: 0,
            last_intermediate: None,
            _watcher: None,
            rx: None,
        }
    }

    /// Block until a filesystem event arrives (or `timeout` elapses), then
    /// re-materialize the tree and return newly observed events.
    pub fn watch_blocking(&mut self, timeout: Duration) -> Vec<ReaderEvent> {
        if let Some(rx) = &self.rx {
            // Drain any queued events so a burst of writes collapses into
            // one re-materialization pass.
            match rx.recv_timeout(timeout) {
                Ok(()) => while rx.try_recv().is_ok() {},
                Err(_) => {}
            }
        }
        self.tick()
    }

    /// Re-materialize the whole tree from disk and return the events newly
    /// crossed by the cursor. Safe to call as often as wanted: unchanged
    /// files are skipped via a content hash.
    pub fn tick(&mut self) -> Vec<ReaderEvent> {
        let root_file = self.root_file.clone();
        let materialized = self.materialize(&root_file);
        let mut slots = Vec::new();
        flatten(&materialized, &mut slots);
        self.advance(&slots)
    }

    fn materialize(&mut self, file_name: &str) -> Vec<Value> {
        let entries = self.load_entries(file_name);
        entries
            .into_iter()
            .map(|entry| self.materialize_entry(entry))
            .collect()
    }

    fn materialize_entry(&mut self, entry: Value) -> Value {
        let expand = entry.get("expand").and_then(|v| v.as_str()).map(str::to_string);
        match expand {
            Some(path) => {
                let child = self.materialize(&path);
                match entry.get("content_type").cloned() {
                    Some(content_type) => {
                        serde_json::json!({ "content_type": content_type, "content": child })
                    }
                    None => Value::Array(child),
                }
            }
            None => entry,
        }
    }

    /// Read and parse `<root_dir>/<file_name>`, tolerating a missing file
    /// (treated as "no content yet") and a transient JSON-decode failure
    /// (reverted to the last successfully parsed buffer).
    fn load_entries(&mut self, file_name: &str) -> Vec<Value> {
        let path = self.root_dir.join(file_name);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(_) => return self.last_good.get(file_name).cloned().unwrap_or_default(),
        };

        let hash = sha1_hex(&bytes);
        if self.last_hash.get(file_name) == Some(&hash) {
            return self.last_good.get(file_name).cloned().unwrap_or_default();
        }

        match serde_json::from_slice::<Vec<Value>>(&bytes) {
            Ok(parsed) => {
                self.last_hash.insert(file_name.to_string(), hash);
                self.last_good.insert(file_name.to_string(), parsed.clone());
                parsed
            }
            Err(_) => self.last_good.get(file_name).cloned().unwrap_or_default(),
        }
    }

    fn advance(&mut self, slots: &[Slot]) -> Vec<ReaderEvent> {
        let mut events = Vec::new();
        loop {
            if self.cursor >= slots.len() {
                if self.last_intermediate.take().is_some() {
                    events.push(ReaderEvent::IntermediateCleared);
                }
                break;
            }
            match &slots[self.cursor] {
                Slot::Permanent(value) => {
                    if self.last_intermediate.take().is_some() {
                        events.push(ReaderEvent::IntermediateCleared);
                    }
                    events.push(ReaderEvent::Permanent(value.clone()));
                    self.cursor += 1;
                }
                Slot::Intermediate(value) => {
                    if *value != self.last_intermediate {
                        self.last_intermediate = value.clone();
                        events.push(match value {
                            Some(v) => ReaderEvent::Intermediate(v.clone()),
                            None => ReaderEvent::IntermediateCleared,
                        });
                    }
                    // An intermediate only parks the cursor when it is the
                    // newest thing in the tree. A later permanent entry
                    // already shows this one is stale, so step past it
                    // instead of stalling forever.
                    if has_subsequent_non_intermediate(&slots[self.cursor + 1..]) {
                        self.cursor += 1;
                        continue;
                    }
                    break;
                }
            }
        }
        events
    }
}

/// Whether any slot after the cursor's current position is not itself an
/// intermediate — i.e. whether the tree has already moved on.
fn has_subsequent_non_intermediate(rest: &[Slot]) -> bool {
    rest.iter().any(|slot| !matches!(slot, Slot::Intermediate(_)))
}

/// Flatten a materialized tree into document order. A plain inlined child
/// (a bare `Value::Array`) recurses transparently; a `content_type:
/// "intermediate"` wrapper occupies exactly one slot, whose value is the
/// last element of its content list (or `None` if empty/cleared).
fn flatten(materialized: &[Value], out: &mut Vec<Slot>) {
    for item in materialized {
        if let Value::Array(children) = item {
            flatten(children, out);
            continue;
        }
        if let Some(content_type) = item.get("content_type") {
            if content_type == "intermediate" {
                let value = item
                    .get("content")
                    .and_then(|c| c.as_array())
                    .and_then(|c| c.last())
                    .cloned();
                out.push(Slot::Intermediate(value));
                continue;
            }
        }
        out.push(Slot::Permanent(item.clone()));
    }
}

fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
#[path = "reader_tests.rs"]
mod tests;
