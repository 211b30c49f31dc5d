// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `Benchmark`: a 2-D table (stage id × input id) of per-stage run times.

use indexmap::IndexMap;
use repro_core::{InputId, StageId};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed times.csv row: {0}")]
    Malformed(String),
}

/// A sparse table of per-stage, per-input wall times in seconds, persisted
/// as `times.csv` alongside a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Benchmark {
    table: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Benchmark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, stage: &StageId, input: &InputId, seconds: f64) {
        self.table
            .entry(stage.as_str().to_string())
            .or_default()
            .insert(input.to_string(), seconds);
    }

    pub fn get(&self, stage: &StageId, input: &InputId) -> Option<f64> {
        self.table.get(stage.as_str())?.get(&input.to_string()).copied()
    }

    /// Merge the timings produced by one pipeline run for a given input.
    pub fn merge_timings(&mut self, timings: &IndexMap<StageId, f64>, input: &InputId) {
        for (stage, secs) in timings {
            self.set(stage, input, *secs);
        }
    }

    /// Copy another benchmark's table wholesale, used by `Task::run`'s
    /// pickup path to seed a fresh benchmark from the ancestor's.
    pub fn adopt(&mut self, other: &Benchmark) {
        self.table = other.table.clone();
    }

    /// Restrict the table to the given stage ids and input ids (used when
    /// storing, so a benchmark never outlives the pipeline/config that
    /// produced it).
    pub fn retain(&mut self, stage_ids: &BTreeSet<String>, input_ids: &BTreeSet<String>) {
        self.table.retain(|stage, _| stage_ids.contains(stage));
        for row in self.table.values_mut() {
            row.retain(|input, _| input_ids.contains(input));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table.values().all(|row| row.is_empty())
    }

    /// Write as CSV: row index = stage id, columns = input ids.
    pub fn save(&self, path: &Path) -> Result<(), BenchmarkError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut cols: BTreeSet<String> = BTreeSet::new();
        for row in self.table.values() {
            cols.extend(row.keys().cloned());
        }
        let cols: Vec<String> = cols.into_iter().collect();

        let mut out = String::from("stage");
        for c in &cols {
            out.push(',');
            out.push_str(c);
        }
        out.push('\n');

        for (stage, row) in &self.table {
            out.push_str(stage);
            for c in &cols {
                out.push(',');
                if let Some(v) = row.get(c) {
                    out.push_str(&v.to_string());
                }
            }
            out.push('\n');
        }

        fs::write(path, out)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Benchmark, BenchmarkError> {
        let content = fs::read_to_string(path)?;
        let mut lines = content.lines();
        let header = lines
            .next()
            .ok_or_else(|| BenchmarkError::Malformed("times.csv is empty".to_string()))?;
        let cols: Vec<&str> = header.split(',').skip(1).collect();

        let mut table = BTreeMap::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let mut parts = line.split(',');
            let stage = parts
                .next()
                .ok_or_else(|| BenchmarkError::Malformed(line.to_string()))?
                .to_string();
            let mut row = BTreeMap::new();
            for (col, val) in cols.iter().zip(parts) {
                if !val.is_empty() {
                    let v: f64 = val
                        .parse()
                        .map_err(|_| BenchmarkError::Malformed(line.to_string()))?;
                    row.insert((*col).to_string(), v);
                }
            }
            table.insert(stage, row);
        }
        Ok(Benchmark { table })
    }
}

#[cfg(test)]
#[path = "benchmark_tests.rs"]
mod tests;
