// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::NO_HEADING_TARGET;
use camino::Utf8PathBuf;
use igt_runner::errors::{
    ExecuteError, InitializeError, JobListError, ResumeError, SettingsParseError,
};
use igt_runnercomms::{DumpError, RunnerExitCode};
use std::error::Error;
use thiserror::Error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method.

/// An error that the runner expects and reports without a backtrace.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("settings parse error")]
    SettingsParse {
        #[from]
        err: SettingsParseError,
    },
    #[error("job list error")]
    JobList {
        #[from]
        err: JobListError,
    },
    #[error("initialize error")]
    Initialize {
        #[from]
        err: InitializeError,
    },
    #[error("resume error")]
    Resume {
        results_dir: Utf8PathBuf,
        #[source]
        err: ResumeError,
    },
    #[error("execute error")]
    Execute {
        #[from]
        err: ExecuteError,
    },
    #[error("failed to build tokio runtime")]
    RuntimeBuild {
        #[source]
        err: std::io::Error,
    },
    #[error("failed to read dump")]
    DumpFileRead {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("failed to decode dump")]
    DumpDecode {
        path: Utf8PathBuf,
        #[source]
        err: DumpError,
    },
    #[error("error writing to output")]
    WriteOutput {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn resume(results_dir: impl Into<Utf8PathBuf>, err: ResumeError) -> Self {
        Self::Resume {
            results_dir: results_dir.into(),
            err,
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::SettingsParse { .. } => RunnerExitCode::INVALID_ARGUMENTS,
            Self::Initialize { .. } | Self::RuntimeBuild { .. } => RunnerExitCode::SETUP_ERROR,
            Self::JobList { .. } => RunnerExitCode::JOB_LIST_CREATION_FAILED,
            Self::Resume { .. } => RunnerExitCode::RESUME_FAILED,
            Self::Execute {
                err: ExecuteError::Reporter(_),
            }
            | Self::WriteOutput { .. } => RunnerExitCode::WRITE_OUTPUT_ERROR,
            Self::Execute { .. } | Self::DumpFileRead { .. } | Self::DumpDecode { .. } => {
                RunnerExitCode::EXECUTION_FAILED
            }
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self) {
        let mut next_error: Option<&dyn Error> = match self {
            Self::SettingsParse { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::JobList { err } => {
                tracing::error!("failed to create job list: {err}");
                err.source()
            }
            Self::Initialize { err } => {
                tracing::error!("failed to initialize results directory");
                Some(err as &dyn Error)
            }
            Self::Resume { results_dir, err } => {
                tracing::error!("failed to resume from `{results_dir}`");
                Some(err as &dyn Error)
            }
            Self::Execute { err } => {
                tracing::error!("execution failed");
                Some(err as &dyn Error)
            }
            Self::RuntimeBuild { err } => {
                tracing::error!("failed to build tokio runtime");
                Some(err as &dyn Error)
            }
            Self::DumpFileRead { path, err } => {
                tracing::error!("failed to read `{path}`");
                Some(err as &dyn Error)
            }
            Self::DumpDecode { path, err } => {
                tracing::error!("failed to decode `{path}`");
                Some(err as &dyn Error)
            }
            Self::WriteOutput { err } => {
                tracing::error!("error writing to output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            tracing::error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
