// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A duplicate of igt_runner's main.rs, so integration tests can refer to it with
//! `CARGO_BIN_EXE_igt-runner-dup`.

use clap::Parser;
use color_eyre::Result;
use igt_runner_cli::{OutputWriter, RunnerApp};

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = RunnerApp::parse();
    let output = opts.init_output();

    match opts.exec(output, &mut OutputWriter::default()) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            error.display_to_stderr();
            std::process::exit(error.process_exit_code())
        }
    }
}
