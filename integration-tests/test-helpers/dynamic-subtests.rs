// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One passing subtest, and one whose second dynamic subtest fails.

use igt_harness::{fail, subtest_main};

fn main() {
    subtest_main(|h| {
        h.subtest("passing", |_| Ok(()));
        h.subtest_with_dynamic("per-pipe", |h| {
            h.dynamic("pipe-A", |_| Ok(()));
            h.dynamic("pipe-B", |_| fail("pipe-B is broken"));
            Ok(())
        });
        Ok(())
    })
}
