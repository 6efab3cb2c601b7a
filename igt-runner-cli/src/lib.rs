// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line front ends for the IGT test runner.
//!
//! This crate provides three binaries:
//!
//! * `igt_runner` builds a job list, initializes a results directory and executes the jobs.
//! * `igt_resume` continues a run that was interrupted, from its results directory.
//! * `igt_comms_decoder` prints the packets recorded in a job's `comms` file.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::OutputWriter;
