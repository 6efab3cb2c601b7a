// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for `igt_runner`, the runner for IGT test binaries.
//!
//! A run goes through these steps:
//!
//! 1. [`Settings`] are built from command-line options and validated.
//! 2. A [`JobList`] is built from the test root's catalogue or an explicit test list.
//! 3. [`ExecuteState::initialize`] writes both into the results directory.
//! 4. [`execute`] runs each job, recording a journal per job so that an interrupted run can be
//!    continued with [`ExecuteState::from_resume`].

mod dmesg;
pub mod errors;
pub mod execute;
mod helpers;
pub mod job_list;
pub mod journal;
pub mod reporter;
pub mod results;
pub mod settings;
pub mod signal;
mod time;
mod watchdog;

pub use execute::{
    AbortReason, ExecutePhase, ExecuteOutcome, ExecuteState, KillSignal, execute,
};
pub use job_list::{JobList, JobListEntry};
pub use settings::{LogLevel, Settings, SettingsOptions};
