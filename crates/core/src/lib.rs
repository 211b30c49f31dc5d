// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! repro-core: data model shared by the pipeline, status, task and batch layers.

pub mod config;
pub mod digest;
pub mod id;
pub mod input_id;
pub mod stage;

pub use config::Config;
pub use digest::{PendingReason, ShaDigest};
pub use id::{IdGen, ShortId, UuidIdGen};
pub use input_id::{InputId, InputIdError, InputIdSpec};
pub use stage::{
    derive_stage_id, ConfigureKind, ConfigureRule, NullStatusSink, PipelineData, PipelineView,
    Stage, StageCallback, StageError, StageEvent, StageId, StageOutcome, StatusSink, TaskCallbacks,
};
