// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Harness edge cases, selected by the `HARNESS_SCENARIO` environment variable.

use igt_harness::{fail, simple_main, skip, subtest_main};
use igt_runnercomms::IgtExitCode;

fn main() {
    let scenario = std::env::var("HARNESS_SCENARIO").unwrap_or_default();
    match scenario.as_str() {
        "nested-subtest" => subtest_main(|h| {
            h.subtest("outer", |h| {
                h.subtest("inner", |_| Ok(()));
                Ok(())
            });
            Ok(())
        }),
        "dynamic-outside" => subtest_main(|h| {
            h.dynamic("stray", |_| Ok(()));
            Ok(())
        }),
        "bad-dynamic-name" => subtest_main(|h| {
            h.subtest_with_dynamic("per-output", |h| {
                h.dynamic("HDMI A-1", |_| Ok(()));
                Ok(())
            });
            Ok(())
        }),
        "top-level-fail" => subtest_main(|h| {
            h.subtest("fine", |_| Ok(()));
            fail("not inside any subtest")
        }),
        "empty-dynamic" => subtest_main(|h| {
            h.subtest_with_dynamic("per-output", |_| Ok(()));
            Ok(())
        }),
        "thread-failure" => subtest_main(|h| {
            h.subtest("threaded", |h| {
                let handle = h.failure_handle();
                std::thread::scope(|s| {
                    s.spawn(|| handle.fail("worker thread failed"));
                });
                Ok(())
            });
            h.subtest("clean", |_| Ok(()));
            Ok(())
        }),
        "simple-skip" => simple_main(|_| skip("nothing to test here")),
        "simple-fail" => simple_main(|_| fail("simple test failed")),
        other => {
            eprintln!("unknown HARNESS_SCENARIO `{other}`");
            std::process::exit(IgtExitCode::INVALID);
        }
    }
}
