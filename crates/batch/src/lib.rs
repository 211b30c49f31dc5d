// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! repro-batch: loads a directory tree of tasks and runs each pending one
//! in an isolated child process (§4.5).

pub mod batch;
pub mod error;

pub use batch::{Batch, ChildCommand, RunContext};
pub use error::BatchError;
