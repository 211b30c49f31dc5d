// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Input identifiers: the values that name one run of a pipeline within a task.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Either a string or an integer, uniquely naming one run of the pipeline
/// within a task.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputId {
    Int(i64),
    Str(String),
}

impl InputId {
    pub fn as_str_repr(&self) -> String {
        match self {
            InputId::Int(n) => n.to_string(),
            InputId::Str(s) => s.clone(),
        }
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputId::Int(n) => write!(f, "{n}"),
            InputId::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for InputId {
    fn from(n: i64) -> Self {
        InputId::Int(n)
    }
}

impl From<&str> for InputId {
    fn from(s: &str) -> Self {
        InputId::Str(s.to_string())
    }
}

/// Errors decoding an `input_ids` specification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputIdError {
    #[error("invalid input id range segment: {0:?}")]
    InvalidRange(String),
    #[error("range segment {0:?} is inverted (start > end)")]
    InvertedRange(String),
}

/// Decode a specification of input identifiers that may be written as a
/// scalar, a list, or a compact range string (e.g. `"1-5, 9, 12-14"`).
///
/// Yields a sorted, duplicate-free list.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum InputIdSpec {
    Scalar(InputId),
    List(Vec<InputId>),
    Range(String),
}

/// A plain YAML/JSON string is always a range spec, never a scalar string
/// id: `decode_input_ids` in the original treats any bare string as
/// comma/range-decodable, so `Range` must be tried before `Scalar`'s own
/// untagged `InputId::Str` arm ever gets a look. `#[serde(untagged)]` alone
/// can't express that ordering across both enums, hence the manual impl.
impl<'de> Deserialize<'de> for InputIdSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Range(String),
            List(Vec<InputId>),
            Scalar(InputId),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Range(s) => InputIdSpec::Range(s),
            Repr::List(ids) => InputIdSpec::List(ids),
            Repr::Scalar(id) => InputIdSpec::Scalar(id),
        })
    }
}

impl InputIdSpec {
    pub fn decode(&self) -> Result<Vec<InputId>, InputIdError> {
        match self {
            InputIdSpec::Scalar(id) => Ok(vec![id.clone()]),
            InputIdSpec::List(ids) => Ok(dedup_sorted(ids.clone())),
            InputIdSpec::Range(s) => decode_range_string(s),
        }
    }
}

fn dedup_sorted(mut ids: Vec<InputId>) -> Vec<InputId> {
    let set: BTreeSet<InputId> = ids.drain(..).collect();
    set.into_iter().collect()
}

/// Parse a compact range string such as `"1-5, 9, 12-14"` into a sorted,
/// duplicate-free list of integer input ids.
pub fn decode_range_string(spec: &str) -> Result<Vec<InputId>, InputIdError> {
    let mut set: BTreeSet<i64> = BTreeSet::new();
    for raw_segment in spec.split(',') {
        let segment = raw_segment.trim();
        if segment.is_empty() {
            continue;
        }
        if let Some((start, end)) = segment.split_once('-') {
            let start = start.trim();
            let end = end.trim();
            let start: i64 = start
                .parse()
                .map_err(|_| InputIdError::InvalidRange(segment.to_string()))?;
            let end: i64 = end
                .parse()
                .map_err(|_| InputIdError::InvalidRange(segment.to_string()))?;
            if start > end {
                return Err(InputIdError::InvertedRange(segment.to_string()));
            }
            for n in start..=end {
                set.insert(n);
            }
        } else {
            let n: i64 = segment
                .parse()
                .map_err(|_| InputIdError::InvalidRange(segment.to_string()))?;
            set.insert(n);
        }
    }
    Ok(set.into_iter().map(InputId::Int).collect())
}
