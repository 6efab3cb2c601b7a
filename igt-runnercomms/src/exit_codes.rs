// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Exit codes produced by IGT test binaries.
///
/// A test binary's exit code summarizes every subtest it executed. The runner records the code in
/// each job's journal, translating codes of 128 and above (and termination by signal) into
/// negative numbers so that they can be told apart from these values.
pub enum IgtExitCode {}

impl IgtExitCode {
    /// Every executed subtest succeeded.
    pub const SUCCESS: i32 = 0;

    /// Every executed subtest was skipped, or no subtests were executed at all.
    pub const SKIP: i32 = 77;

    /// The test hit a timeout of its own.
    pub const TIMEOUT: i32 = 78;

    /// The test was invoked incorrectly, for example with an unknown subtest selection.
    ///
    /// This is also the result of `--list-subtests` on a binary without subtests.
    pub const INVALID: i32 = 79;

    /// At least one executed subtest failed.
    pub const FAILURE: i32 = 98;

    /// The test requested that the whole run be aborted.
    ///
    /// The runner stops executing jobs when it sees this code.
    pub const ABORT: i32 = 112;

    /// Returns a short human-readable name for a known exit code.
    pub fn name(code: i32) -> Option<&'static str> {
        match code {
            Self::SUCCESS => Some("SUCCESS"),
            Self::SKIP => Some("SKIP"),
            Self::TIMEOUT => Some("TIMEOUT"),
            Self::INVALID => Some("INVALID"),
            Self::FAILURE => Some("FAILURE"),
            Self::ABORT => Some("ABORT"),
            _ => None,
        }
    }
}

/// Documented exit codes for `igt_runner` and `igt_resume`.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum RunnerExitCode {}

impl RunnerExitCode {
    /// Every scheduled job was executed.
    pub const OK: i32 = 0;

    /// Execution could not proceed, for example because a results directory could not be written.
    pub const EXECUTION_FAILED: i32 = 1;

    /// The command line could not be parsed.
    pub const INVALID_ARGUMENTS: i32 = 2;

    /// Settings were parsed but failed validation.
    pub const SETUP_ERROR: i32 = 96;

    /// The job list could not be built.
    pub const JOB_LIST_CREATION_FAILED: i32 = 104;

    /// A results directory could not be read back for resuming.
    pub const RESUME_FAILED: i32 = 106;

    /// Execution stopped early. A test aborted, a failure occurred with
    /// `--abort-on-monitored-error`, the overall timeout expired, or the
    /// runner was interrupted.
    pub const ABORTED: i32 = 112;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
