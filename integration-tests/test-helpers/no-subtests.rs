// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A simple test without subtests.

use igt_harness::simple_main;

fn main() {
    simple_main(|h| {
        h.info("simple test running");
        Ok(())
    })
}
