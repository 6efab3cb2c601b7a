// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two subtests that always pass.

use igt_harness::subtest_main;

fn main() {
    subtest_main(|h| {
        h.subtest("first-subtest", |h| {
            h.info("first subtest running");
            Ok(())
        });
        h.subtest("second-subtest", |_| Ok(()));
        Ok(())
    })
}
