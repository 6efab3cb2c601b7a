// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running a job list.
//!
//! The main entry point is [`execute`], which runs jobs from an [`ExecuteState`] until the list is
//! exhausted or the run stops. Every job gets a numbered directory under the results path holding
//! its journal, captured output, kernel log and comms dump. Because the journal is written as the
//! job progresses, a run that dies midway can be continued with [`ExecuteState::from_resume`].

mod imp;
mod monitor;
mod process;
pub(crate) mod result_dir;

pub use imp::*;
pub use process::KillSignal;
