// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Blocks and result reporting for IGT-style test binaries.
//!
//! A test binary is either a collection of subtests, driven by [`subtest_main`], or a single
//! simple test, driven by [`simple_main`]:
//!
//! ```no_run
//! use igt_harness::{require, subtest_main};
//!
//! subtest_main(|h| {
//!     h.fixture(|_| require(std::path::Path::new("/dev/dri").exists(), "no DRM devices"));
//!     h.subtest("basic", |_| Ok(()));
//!     h.subtest_with_dynamic("per-pipe", |h| {
//!         for pipe in ["pipe-A", "pipe-B"] {
//!             h.dynamic(pipe, |_| Ok(()));
//!         }
//!         Ok(())
//!     });
//!     Ok(())
//! })
//! ```
//!
//! The legal nesting of blocks is fixed; see [`SubtestStack`]. Opening a block where it is not
//! allowed is a programming error in the test binary and aborts the process.
//!
//! When the binary is started by `igt_runner`, every event is sent over the runner's socket as a
//! packet (see `igt-runnercomms`). Otherwise events are printed as text.

mod errors;
mod failure;
mod harness;
mod output;
mod selection;
mod stack;

pub use errors::*;
pub use failure::FailureHandle;
pub use harness::*;
pub use output::SubtestOutcome;
pub use selection::*;
pub use stack::*;

use clap::Parser;
use igt_runnercomms::IgtExitCode;

/// Command-line arguments understood by every test binary.
#[derive(Debug, Parser)]
#[command(disable_version_flag = true)]
struct HarnessArgs {
    /// List the subtests of this binary without running them
    #[arg(long)]
    list_subtests: bool,

    /// Run only the subtests matching this comma-separated list of globs
    ///
    /// The last matching pattern decides; patterns starting with `!` exclude.
    #[arg(long, value_name = "LIST")]
    run_subtest: Option<String>,
}

/// Runs a test binary made up of subtests, then exits with the aggregated exit code.
pub fn subtest_main<F>(body: F) -> !
where
    F: FnOnce(&mut Harness) -> BlockResult,
{
    let mut harness = harness_from_args(TestMode::Subtests);
    if !harness.is_listing() {
        harness.version(&version_string());
    }
    let result = body(&mut harness);
    let code = harness.finish_subtests(result);
    std::process::exit(code)
}

/// Runs a simple test binary, then exits with its exit code.
pub fn simple_main<F>(body: F) -> !
where
    F: FnOnce(&mut Harness) -> BlockResult,
{
    let mut harness = harness_from_args(TestMode::Simple);
    if harness.is_listing() {
        // Simple tests have no subtests to list.
        std::process::exit(harness.finish_simple_test(Ok(())));
    }
    harness.version(&version_string());
    let result = body(&mut harness);
    let code = harness.finish_simple_test(result);
    std::process::exit(code)
}

fn harness_from_args(mode: TestMode) -> Harness {
    let args = match HarnessArgs::try_parse() {
        Ok(args) => args,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            std::process::exit(IgtExitCode::INVALID);
        }
    };

    let mut builder = Harness::builder(mode)
        .list_subtests(args.list_subtests)
        .output_from_env();
    if let Some(list) = &args.run_subtest {
        match SubtestSelection::parse(list) {
            Ok(selection) => builder = builder.selection(selection),
            Err(err) => {
                eprintln!("error: {err}");
                std::process::exit(IgtExitCode::INVALID);
            }
        }
    }
    builder.build()
}

fn version_string() -> String {
    format!(
        "IGT-Version: {} ({}) ({})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::ARCH,
        std::env::consts::OS,
    )
}
