// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `Status`: a tree of file-backed nodes. Each node owns `<root_dir>/<id>.json`
//! holding a JSON array of permanent entries and `{"expand": ...}` pointers
//! to child nodes (plain, or tagged `content_type: "intermediate"` for the
//! single replaceable slot).

use parking_lot::Mutex;
use repro_core::{IdGen, StatusSink, UuidIdGen};
use serde_json::{json, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

type IdFactory = Arc<dyn Fn() -> String + Send + Sync>;

struct Inner {
    root_dir: PathBuf,
    file_name: String,
    entries: Mutex<Vec<Value>>,
    intermediate: Mutex<Option<Status>>,
    id_gen: IdFactory,
}

/// A handle to one node in a status tree. Cheaply cloneable; clones share
/// the same underlying file and in-memory buffer.
#[derive(Clone)]
pub struct Status {
    inner: Arc<Inner>,
}

impl Status {
    /// Create a new root node backed by a fresh file under `root_dir`.
    pub fn root(root_dir: impl Into<PathBuf>) -> Result<Status, StatusError> {
        Self::root_with_gen(root_dir, UuidIdGen)
    }

    pub fn root_with_gen<G: IdGen + 'static>(root_dir: impl Into<PathBuf>, id_gen: G) -> Result<Status, StatusError> {
        let root_dir = root_dir.into();
        fs::create_dir_all(&root_dir)?;
        let factory: IdFactory = Arc::new(move || id_gen.next());
        let status = Self::new_node(root_dir, factory);
        status.flush()?;
        Ok(status)
    }

    /// A root node backed by a fresh temporary directory, kept alive for
    /// as long as the returned [`tempfile::TempDir`] is held. Convenient
    /// for tests and for a CLI's own top-level status tree.
    pub fn create_temp() -> Result<(Status, tempfile::TempDir), StatusError> {
        let dir = tempfile::tempdir()?;
        let status = Self::root(dir.path())?;
        Ok((status, dir))
    }

    /// Attach to a node file that another process already created via
    /// [`Status::derive`] (or this one, before a fork/re-exec boundary),
    /// preserving whatever it already holds rather than starting blank.
    /// Used by a spawned task process to keep writing into the status node
    /// the parent process linked before handing the run off.
    pub fn attach(root_dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Status {
        let root_dir = root_dir.into();
        let file_name = file_name.into();
        let existing = Self::read_existing(&root_dir, &file_name);
        let id_gen: IdFactory = Arc::new(|| UuidIdGen.next());
        Status {
            inner: Arc::new(Inner {
                root_dir,
                file_name,
                entries: Mutex::new(existing),
                intermediate: Mutex::new(None),
                id_gen,
            }),
        }
    }

    fn read_existing(root_dir: &Path, file_name: &str) -> Vec<Value> {
        let path = root_dir.join(file_name);
        fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    fn new_node(root_dir: PathBuf, id_gen: IdFactory) -> Status {
        let file_name = format!("{}.json", (id_gen)());
        Status {
            inner: Arc::new(Inner {
                root_dir,
                file_name,
                entries: Mutex::new(Vec::new()),
                intermediate: Mutex::new(None),
                id_gen,
            }),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.inner.root_dir.join(&self.inner.file_name)
    }

    pub fn file_name(&self) -> &str {
        &self.inner.file_name
    }

    pub fn root_dir(&self) -> &Path {
        &self.inner.root_dir
    }

    /// Append a permanent entry, clearing any active intermediate first.
    pub fn write(&self, value: Value) {
        self.clear_intermediate();
        let mut entries = self.inner.entries.lock();
        entries.push(value);
        self.flush_locked_logged(&entries);
    }

    /// Replace (or, with `None`, clear) the single intermediate slot.
    pub fn intermediate(&self, value: Option<Value>) {
        match value {
            None => self.clear_intermediate(),
            Some(v) => {
                let mut current = self.inner.intermediate.lock();
                if let Some(child) = current.as_ref() {
                    child.overwrite(v);
                } else {
                    let child = Status::new_node(self.inner.root_dir.clone(), self.inner.id_gen.clone());
                    child.overwrite(v);
                    let mut entries = self.inner.entries.lock();
                    entries.push(json!({
                        "expand": child.file_name(),
                        "content_type": "intermediate",
                    }));
                    self.flush_locked_logged(&entries);
                    *current = Some(child);
                }
            }
        }
    }

    fn clear_intermediate(&self) {
        let mut current = self.inner.intermediate.lock();
        if current.take().is_some() {
            let mut entries = self.inner.entries.lock();
            entries.retain(|e| e.get("content_type") != Some(&json!("intermediate")));
            self.flush_locked_logged(&entries);
        }
    }

    /// Create a child node and link it with a plain (permanent) pointer,
    /// clearing any active intermediate first.
    pub fn derive(&self) -> Status {
        self.clear_intermediate();
        let child = Status::new_node(self.inner.root_dir.clone(), self.inner.id_gen.clone());
        if let Err(err) = child.flush() {
            tracing::warn!(path = %child.path().display(), error = %err, "failed to flush newly derived status node");
        }
        let mut entries = self.inner.entries.lock();
        entries.push(json!({ "expand": child.file_name() }));
        self.flush_locked_logged(&entries);
        child
    }

    /// Replace this node's own entries wholesale (used for the single
    /// intermediate child, whose contents are atomically overwritten on
    /// each update).
    fn overwrite(&self, value: Value) {
        let mut entries = self.inner.entries.lock();
        *entries = vec![value];
        self.flush_locked_logged(&entries);
    }

    fn flush(&self) -> Result<(), StatusError> {
        let entries = self.inner.entries.lock();
        self.flush_locked(&entries)
    }

    fn flush_locked(&self, entries: &[Value]) -> Result<(), StatusError> {
        let path = self.path();
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string(entries).unwrap_or_else(|_| "[]".to_string());
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// `flush_locked`, logging rather than propagating a failure: callers on
    /// the write path have no error return of their own (the status tree is
    /// best-effort instrumentation, not load-bearing state).
    fn flush_locked_logged(&self, entries: &[Value]) {
        if let Err(err) = self.flush_locked(entries) {
            tracing::warn!(path = %self.path().display(), error = %err, "failed to flush status entries");
        }
    }

    /// Iterate `iter`, emitting an intermediate `{"info": "progress", ...}`
    /// update at each step; the intermediate is cleared when the returned
    /// iterator is dropped (normal termination, early return, or failure).
    pub fn progress<I>(&self, iter: I, total: usize, details: Value) -> ProgressIter<I::IntoIter>
    where
        I: IntoIterator,
    {
        ProgressIter {
            inner: iter.into_iter(),
            status: self.clone(),
            total,
            details,
            step: 0,
        }
    }
}

impl StatusSink for Status {
    fn write(&self, value: Value) {
        Status::write(self, value)
    }

    fn intermediate(&self, value: Option<Value>) {
        Status::intermediate(self, value)
    }
}

/// Iterator adapter returned by [`Status::progress`].
pub struct ProgressIter<I> {
    inner: I,
    status: Status,
    total: usize,
    details: Value,
    step: usize,
}

impl<I: Iterator> Iterator for ProgressIter<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        self.step += 1;
        let progress = if self.total == 0 {
            0.0
        } else {
            self.step as f64 / self.total as f64
        };
        self.status.intermediate(Some(json!({
            "info": "progress",
            "step": self.step,
            "max_steps": self.total,
            "progress": progress,
            "details": self.details,
        })));
        Some(item)
    }
}

impl<I> Drop for ProgressIter<I> {
    fn drop(&mut self) {
        self.status.intermediate(None);
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
