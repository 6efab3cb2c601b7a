// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A duplicate of igt_comms_decoder's main.rs.

use clap::Parser;
use color_eyre::Result;
use igt_runner_cli::{DecoderApp, OutputWriter};

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = DecoderApp::parse();
    let _ = opts.init_output();

    match opts.exec(&mut OutputWriter::default()) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            error.display_to_stderr();
            std::process::exit(error.process_exit_code())
        }
    }
}
