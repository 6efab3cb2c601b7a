// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A subtest that aborts the whole run.

use igt_harness::{abort, subtest_main};

fn main() {
    subtest_main(|h| {
        h.subtest("abort-now", |_| abort("the machine is in an unusable state"));
        h.subtest("never-runs", |_| Ok(()));
        Ok(())
    })
}
