// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted digests (`.sha.json`) and the pending-reason classification
//! derived from comparing them against the current pipeline and config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `.sha.json`: `{ stages: { stage_id -> sha }, task: sha(config) }`.
///
/// Recorded after every successful [`crate::Task`]-level run so a later
/// invocation can decide whether prior results are still valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaDigest {
    pub stages: BTreeMap<String, String>,
    pub task: String,
}

impl ShaDigest {
    pub fn new(stages: BTreeMap<String, String>, task: impl Into<String>) -> Self {
        Self {
            stages,
            task: task.into(),
        }
    }
}

/// Why a task is (or is not) pending, per spec §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingReason {
    /// `.sha.json` matches the current pipeline and config.
    Complete,
    /// `.sha.json` is missing.
    Incomplete,
    /// Some stage's `sha` differs from the stored one.
    Pipeline,
    /// The task's `sha(config)` differs (spec or config changed).
    Specification,
}

impl PendingReason {
    /// The empty-string-means-complete code used throughout the spec.
    pub fn code(self) -> &'static str {
        match self {
            PendingReason::Complete => "",
            PendingReason::Incomplete => "incomplete",
            PendingReason::Pipeline => "pipeline",
            PendingReason::Specification => "specification",
        }
    }

    pub fn is_pending(self) -> bool {
        !matches!(self, PendingReason::Complete)
    }
}

impl std::fmt::Display for PendingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}
