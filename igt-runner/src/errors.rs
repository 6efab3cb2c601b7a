// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by igt-runner.

use camino::Utf8PathBuf;
use thiserror::Error;

/// An error that occurs while turning command-line options into [`Settings`](crate::Settings).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsParseError {
    /// Only a results path was given, and no test root is set in the environment.
    #[error("no test root given (pass it before the results path, or set {env_var})")]
    NoTestRoot {
        /// The environment variable that can provide the test root.
        env_var: &'static str,
    },

    /// An include or exclude pattern is not a valid regex.
    #[error("invalid {kind} pattern `{pattern}`")]
    InvalidRegex {
        /// "include" or "exclude".
        kind: &'static str,
        /// The pattern as given.
        pattern: String,
        /// The underlying error.
        #[source]
        error: regex::Error,
    },

    /// A path could not be made absolute.
    #[error("failed to resolve path `{path}`")]
    ResolvePath {
        /// The path as given.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The current directory is not valid UTF-8.
    #[error("current directory is invalid UTF-8")]
    CurrentDirInvalidUtf8(#[source] camino::FromPathBufError),
}

/// An error that occurs while validating [`Settings`](crate::Settings).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsValidateError {
    /// The explicit test list could not be opened.
    #[error("cannot open test list `{path}`")]
    TestListUnreadable {
        /// The test list path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The test root is not a directory.
    #[error("test root `{path}` is not a directory")]
    TestRootNotDir {
        /// The test root.
        path: Utf8PathBuf,
    },

    /// Neither an explicit test list nor the test root's catalogue can be read.
    #[error("no test list given and `{path}` cannot be opened")]
    NoCatalogue {
        /// The catalogue path that was tried.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error that occurs while writing `metadata.txt`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsSerializeError {
    /// The results directory could not be created.
    #[error("failed to create results directory `{path}`")]
    CreateDir {
        /// The results directory.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Results already exist and overwriting was not requested.
    #[error("`{path}` already exists (hint: pass --overwrite to replace earlier results)")]
    AlreadyExists {
        /// The existing file.
        path: Utf8PathBuf,
    },

    /// An existing file could not be removed.
    #[error("failed to remove `{path}`")]
    Remove {
        /// The file being removed.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Writing the file failed.
    #[error("failed to write `{path}`")]
    Write {
        /// The file being written.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },
}

/// An error that occurs while reading `metadata.txt` back.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsReadError {
    /// The file could not be read.
    #[error("failed to read `{path}`")]
    Read {
        /// The metadata file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A key had a value of the wrong shape.
    #[error("in `{path}`, invalid value `{value}` for key `{key}`")]
    InvalidValue {
        /// The metadata file.
        path: Utf8PathBuf,
        /// The key.
        key: String,
        /// The value.
        value: String,
    },

    /// A required key was missing.
    #[error("in `{path}`, required key `{key}` is missing")]
    MissingKey {
        /// The metadata file.
        path: Utf8PathBuf,
        /// The key.
        key: &'static str,
    },
}

/// An error that occurs while building a [`JobList`](crate::JobList).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobListError {
    /// No explicit test list was given and the catalogue could not be read.
    #[error("no test list given and `{path}` cannot be read")]
    NoTestList {
        /// The catalogue path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The catalogue is not in the `TESTLIST ... END TESTLIST` format.
    #[error("`{path}` is malformed: {message}")]
    MalformedCatalogue {
        /// The catalogue path.
        path: Utf8PathBuf,
        /// What is wrong with it.
        message: &'static str,
    },

    /// The explicit test list could not be read.
    #[error("failed to read test list `{path}`")]
    ReadTestList {
        /// The test list path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error that occurs while writing `joblist.txt`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobListWriteError {
    /// Results already exist and overwriting was not requested.
    #[error("`{path}` already exists (hint: pass --overwrite to replace earlier results)")]
    AlreadyExists {
        /// The existing file.
        path: Utf8PathBuf,
    },

    /// Writing the file failed.
    #[error("failed to write `{path}`")]
    Write {
        /// The job list file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },
}

/// An error that occurs while reading `joblist.txt` back.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobListReadError {
    /// The file could not be read.
    #[error("failed to read `{path}`")]
    Read {
        /// The job list file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The file is not in the `<binary> <count>` format.
    #[error("`{path}` line {line_number}: {message}")]
    Parse {
        /// The job list file.
        path: Utf8PathBuf,
        /// The 1-based line number.
        line_number: usize,
        /// What is wrong with the line.
        message: String,
    },
}

impl JobListReadError {
    pub(crate) fn parse(
        path: impl Into<Utf8PathBuf>,
        line_number: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::Parse {
            path: path.into(),
            line_number,
            message: message.into(),
        }
    }
}

/// An error that occurs while starting a new run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InitializeError {
    /// The settings are invalid.
    #[error("invalid settings")]
    Validate(#[from] SettingsValidateError),

    /// Writing `metadata.txt` failed.
    #[error("failed to write settings")]
    Settings(#[from] SettingsSerializeError),

    /// Writing `joblist.txt` failed.
    #[error("failed to write job list")]
    JobList(#[from] JobListWriteError),

    /// Clearing results of an earlier run failed.
    #[error("failed to clear earlier results at `{path}`")]
    ClearResults {
        /// The path being removed.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error that occurs while reconstructing a run from its results directory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResumeError {
    /// `metadata.txt` could not be read.
    #[error("failed to read settings")]
    Settings(#[from] SettingsReadError),

    /// `joblist.txt` could not be read.
    #[error("failed to read job list")]
    JobList(#[from] JobListReadError),

    /// A journal could not be read.
    #[error("failed to read journal `{path}`")]
    Journal {
        /// The journal path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error that stops [`execute`](crate::execute).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecuteError {
    /// Setting up signal handlers failed.
    #[error("error setting up signal handler")]
    SignalSetup(#[from] SignalHandlerSetupError),

    /// A file or directory in the results directory could not be written.
    #[error("error writing `{path}`")]
    ResultsIo {
        /// The path being written.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A timed-out test survived SIGKILL.
    #[error("child `{binary}` refuses to die")]
    ChildRefusesToDie {
        /// The test binary.
        binary: String,
    },

    /// Reconstructing state after a timeout failed.
    #[error("failed to reload state after a timeout")]
    Resume(#[from] ResumeError),

    /// Writing to the reporter failed.
    #[error("error writing to output")]
    Reporter(#[source] std::io::Error),
}

impl ExecuteError {
    pub(crate) fn results_io(path: impl Into<Utf8PathBuf>, error: std::io::Error) -> Self {
        Self::ResultsIo {
            path: path.into(),
            error,
        }
    }
}

/// An error returned when setting up signal handlers fails.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct SignalHandlerSetupError(#[from] std::io::Error);
