// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers for running the igt_runner binaries from integration tests.

pub mod runner_cli;
