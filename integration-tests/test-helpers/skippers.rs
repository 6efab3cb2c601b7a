// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A fixture that always skips, taking both subtests with it.

use igt_harness::{require, subtest_main};

fn main() {
    subtest_main(|h| {
        h.fixture(|_| require(false, "the required hardware is missing"));
        h.subtest("skip-one", |_| Ok(()));
        h.subtest("skip-two", |_| Ok(()));
        Ok(())
    })
}
