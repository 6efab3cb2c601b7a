// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The resolved configuration of a run, and its `metadata.txt` form.
//!
//! A results directory is self-describing: [`Settings::serialize`] writes every field except the
//! include and exclude patterns, and [`Settings::deserialize`] reads them back so that a run can
//! be resumed with nothing but the directory.

use crate::errors::{
    SettingsParseError, SettingsReadError, SettingsSerializeError, SettingsValidateError,
};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::{fs, io::Write};
use swrite::{SWrite, swriteln};

/// The environment variable that overrides the test root given on the command line.
pub const TEST_ROOT_ENV: &str = "IGT_TEST_ROOT";

/// The name of the settings file in a results directory.
pub const METADATA_FILE_NAME: &str = "metadata.txt";

/// The name of the test catalogue in a test root.
pub const CATALOGUE_FILE_NAME: &str = "test-list.txt";

/// How much the runner prints while executing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum LogLevel {
    /// Print nothing but errors.
    Quiet,
    /// Print a progress line per job.
    #[default]
    Normal,
    /// Also print subtest boundaries as they happen.
    Verbose,
}

impl LogLevel {
    /// Returns the numeric form stored in `metadata.txt`.
    pub fn as_metadata(self) -> i32 {
        match self {
            Self::Quiet => -1,
            Self::Normal => 0,
            Self::Verbose => 1,
        }
    }

    /// Parses the numeric form stored in `metadata.txt`.
    pub fn from_metadata(value: i32) -> Option<Self> {
        match value {
            -1 => Some(Self::Quiet),
            0 => Some(Self::Normal),
            1 => Some(Self::Verbose),
            _ => None,
        }
    }
}

/// Unresolved settings, as collected from the command line.
#[derive(Clone, Debug, Default)]
pub struct SettingsOptions {
    /// The test root given on the command line, if any.
    pub test_root: Option<Utf8PathBuf>,
    /// The test root from [`TEST_ROOT_ENV`], if set. Takes precedence over `test_root`.
    pub env_test_root: Option<Utf8PathBuf>,
    /// The results directory.
    pub results_path: Utf8PathBuf,
    /// The run name. Defaults to the last component of the results path.
    pub name: Option<String>,
    /// An explicit list of tests to run.
    pub test_list: Option<Utf8PathBuf>,
    /// Include patterns, in priority order.
    pub include: Vec<String>,
    /// Exclude patterns, in priority order.
    pub exclude: Vec<String>,
    /// Build the job list without running anything.
    pub dry_run: bool,
    /// Run each subtest in its own process.
    pub sync: bool,
    /// Run all selected subtests of a binary in one process.
    pub multiple_mode: bool,
    /// How much to print.
    pub log_level: LogLevel,
    /// Replace results of an earlier run.
    pub overwrite: bool,
    /// Seconds without output before a test is killed. 0 disables.
    pub inactivity_timeout: u64,
    /// Seconds after which no new jobs are started. 0 disables.
    pub overall_timeout: u64,
    /// Arm hardware watchdogs while tests run.
    pub use_watchdog: bool,
    /// Stop the run after a failed job.
    pub abort_on_error: bool,
    /// Record that dmesg warnings should be classified piglit-style.
    pub piglit_style_dmesg: bool,
}

/// The resolved configuration of a run.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Absolute path to the directory holding test binaries.
    pub test_root: Utf8PathBuf,
    /// Absolute path to the results directory.
    pub results_path: Utf8PathBuf,
    /// The run name.
    pub name: String,
    /// Absolute path to an explicit list of tests, if any.
    pub test_list: Option<Utf8PathBuf>,
    /// Include patterns. Not persisted.
    pub include_regexes: Vec<Regex>,
    /// Exclude patterns. Not persisted.
    pub exclude_regexes: Vec<Regex>,
    /// Build the job list without running anything.
    pub dry_run: bool,
    /// Run each subtest in its own process.
    pub sync: bool,
    /// Run all selected subtests of a binary in one process.
    pub multiple_mode: bool,
    /// How much to print.
    pub log_level: LogLevel,
    /// Replace results of an earlier run.
    pub overwrite: bool,
    /// Seconds without output before a test is killed. 0 disables.
    pub inactivity_timeout: u64,
    /// Seconds after which no new jobs are started. 0 disables.
    pub overall_timeout: u64,
    /// Arm hardware watchdogs while tests run.
    pub use_watchdog: bool,
    /// Stop the run after a failed job.
    pub abort_on_error: bool,
    /// Record that dmesg warnings should be classified piglit-style.
    pub piglit_style_dmesg: bool,
}

impl PartialEq for Settings {
    fn eq(&self, other: &Self) -> bool {
        fn patterns(regexes: &[Regex]) -> Vec<&str> {
            regexes.iter().map(Regex::as_str).collect()
        }

        self.test_root == other.test_root
            && self.results_path == other.results_path
            && self.name == other.name
            && self.test_list == other.test_list
            && patterns(&self.include_regexes) == patterns(&other.include_regexes)
            && patterns(&self.exclude_regexes) == patterns(&other.exclude_regexes)
            && self.dry_run == other.dry_run
            && self.sync == other.sync
            && self.multiple_mode == other.multiple_mode
            && self.log_level == other.log_level
            && self.overwrite == other.overwrite
            && self.inactivity_timeout == other.inactivity_timeout
            && self.overall_timeout == other.overall_timeout
            && self.use_watchdog == other.use_watchdog
            && self.abort_on_error == other.abort_on_error
            && self.piglit_style_dmesg == other.piglit_style_dmesg
    }
}

impl Settings {
    /// Resolves command-line options into settings.
    ///
    /// Paths become absolute and symlink-free, patterns are compiled, and the name is defaulted.
    /// Nothing on disk is created or checked beyond resolving paths.
    pub fn from_options(options: SettingsOptions) -> Result<Self, SettingsParseError> {
        let test_root = options
            .env_test_root
            .or(options.test_root)
            .ok_or(SettingsParseError::NoTestRoot {
                env_var: TEST_ROOT_ENV,
            })?;
        let test_root = resolve_path(&test_root)?;
        let results_path = resolve_path(&options.results_path)?;
        let test_list = options
            .test_list
            .as_deref()
            .map(resolve_path)
            .transpose()?;

        let name = match options.name {
            Some(name) => name,
            None => results_path.file_name().unwrap_or_default().to_owned(),
        };

        Ok(Self {
            test_root,
            results_path,
            name,
            test_list,
            include_regexes: compile_regexes("include", &options.include)?,
            exclude_regexes: compile_regexes("exclude", &options.exclude)?,
            dry_run: options.dry_run,
            sync: options.sync,
            multiple_mode: options.multiple_mode,
            log_level: options.log_level,
            overwrite: options.overwrite,
            inactivity_timeout: options.inactivity_timeout,
            overall_timeout: options.overall_timeout,
            use_watchdog: options.use_watchdog,
            abort_on_error: options.abort_on_error,
            piglit_style_dmesg: options.piglit_style_dmesg,
        })
    }

    /// Checks that the inputs of a run are readable.
    pub fn validate(&self) -> Result<(), SettingsValidateError> {
        if let Some(test_list) = &self.test_list {
            fs::File::open(test_list).map_err(|error| {
                SettingsValidateError::TestListUnreadable {
                    path: test_list.clone(),
                    error,
                }
            })?;
        }

        if !self.test_root.is_dir() {
            return Err(SettingsValidateError::TestRootNotDir {
                path: self.test_root.clone(),
            });
        }

        if self.test_list.is_none() {
            let catalogue = self.catalogue_path();
            fs::File::open(&catalogue).map_err(|error| SettingsValidateError::NoCatalogue {
                path: catalogue,
                error,
            })?;
        }

        Ok(())
    }

    /// Returns the path of the test catalogue in the test root.
    pub fn catalogue_path(&self) -> Utf8PathBuf {
        self.test_root.join(CATALOGUE_FILE_NAME)
    }

    /// Writes `metadata.txt`, creating the results directory if needed.
    ///
    /// An existing `metadata.txt` is an error unless [`Self::overwrite`] is set.
    pub fn serialize(&self) -> Result<(), SettingsSerializeError> {
        fs::create_dir_all(&self.results_path).map_err(|error| {
            SettingsSerializeError::CreateDir {
                path: self.results_path.clone(),
                error,
            }
        })?;

        let path = self.results_path.join(METADATA_FILE_NAME);
        if path.exists() {
            if !self.overwrite {
                return Err(SettingsSerializeError::AlreadyExists { path });
            }
            fs::remove_file(&path).map_err(|error| SettingsSerializeError::Remove {
                path: path.clone(),
                error,
            })?;
        }

        let contents = self.to_metadata();
        AtomicFile::new(&path, OverwriteBehavior::DisallowOverwrite)
            .write(|file| file.write_all(contents.as_bytes()))
            .map_err(|error| SettingsSerializeError::Write { path, error })
    }

    fn to_metadata(&self) -> String {
        let mut out = String::new();
        swriteln!(out, "abort_on_error : {}", u8::from(self.abort_on_error));
        if let Some(test_list) = &self.test_list {
            swriteln!(out, "test_list : {test_list}");
        }
        swriteln!(out, "name : {}", self.name);
        swriteln!(out, "dry_run : {}", u8::from(self.dry_run));
        swriteln!(out, "sync : {}", u8::from(self.sync));
        swriteln!(out, "log_level : {}", self.log_level.as_metadata());
        swriteln!(out, "overwrite : {}", u8::from(self.overwrite));
        swriteln!(out, "multiple_mode : {}", u8::from(self.multiple_mode));
        swriteln!(out, "inactivity_timeout : {}", self.inactivity_timeout);
        swriteln!(out, "overall_timeout : {}", self.overall_timeout);
        swriteln!(out, "use_watchdog : {}", u8::from(self.use_watchdog));
        swriteln!(
            out,
            "piglit_style_dmesg : {}",
            u8::from(self.piglit_style_dmesg)
        );
        swriteln!(out, "test_root : {}", self.test_root);
        swriteln!(out, "results_path : {}", self.results_path);
        out
    }

    /// Reads `metadata.txt` from `results_dir`.
    ///
    /// Every field starts from its default, so nothing carries over from earlier settings. Include
    /// and exclude patterns come back empty. Unknown keys are skipped with a warning.
    pub fn deserialize(results_dir: &Utf8Path) -> Result<Self, SettingsReadError> {
        let path = results_dir.join(METADATA_FILE_NAME);
        let contents = fs::read_to_string(&path).map_err(|error| SettingsReadError::Read {
            path: path.clone(),
            error,
        })?;

        let mut options = SettingsOptions::default();
        let mut test_root = None;
        let mut results_path = None;

        for line in contents.lines() {
            let Some((key, value)) = line.split_once(" : ") else {
                if !line.trim().is_empty() {
                    tracing::warn!("in {path}, ignoring malformed line `{line}`");
                }
                continue;
            };
            let invalid = || SettingsReadError::InvalidValue {
                path: path.clone(),
                key: key.to_owned(),
                value: value.to_owned(),
            };

            match key {
                "abort_on_error" => options.abort_on_error = parse_bool(value).ok_or_else(invalid)?,
                "test_list" => options.test_list = Some(value.into()),
                "name" => options.name = Some(value.to_owned()),
                "dry_run" => options.dry_run = parse_bool(value).ok_or_else(invalid)?,
                "sync" => options.sync = parse_bool(value).ok_or_else(invalid)?,
                "log_level" => {
                    options.log_level = value
                        .parse()
                        .ok()
                        .and_then(LogLevel::from_metadata)
                        .ok_or_else(invalid)?;
                }
                "overwrite" => options.overwrite = parse_bool(value).ok_or_else(invalid)?,
                "multiple_mode" => options.multiple_mode = parse_bool(value).ok_or_else(invalid)?,
                "inactivity_timeout" => {
                    options.inactivity_timeout = value.parse().map_err(|_| invalid())?;
                }
                "overall_timeout" => {
                    options.overall_timeout = value.parse().map_err(|_| invalid())?;
                }
                "use_watchdog" => options.use_watchdog = parse_bool(value).ok_or_else(invalid)?,
                "piglit_style_dmesg" => {
                    options.piglit_style_dmesg = parse_bool(value).ok_or_else(invalid)?;
                }
                "test_root" => test_root = Some(Utf8PathBuf::from(value)),
                "results_path" => results_path = Some(Utf8PathBuf::from(value)),
                _ => tracing::warn!("in {path}, ignoring unknown key `{key}`"),
            }
        }

        let test_root = test_root.ok_or_else(|| SettingsReadError::MissingKey {
            path: path.clone(),
            key: "test_root",
        })?;
        let results_path = results_path.ok_or_else(|| SettingsReadError::MissingKey {
            path: path.clone(),
            key: "results_path",
        })?;
        let name = match options.name {
            Some(name) => name,
            None => results_path.file_name().unwrap_or_default().to_owned(),
        };

        Ok(Self {
            test_root,
            results_path,
            name,
            test_list: options.test_list,
            include_regexes: Vec::new(),
            exclude_regexes: Vec::new(),
            dry_run: options.dry_run,
            sync: options.sync,
            multiple_mode: options.multiple_mode,
            log_level: options.log_level,
            overwrite: options.overwrite,
            inactivity_timeout: options.inactivity_timeout,
            overall_timeout: options.overall_timeout,
            use_watchdog: options.use_watchdog,
            abort_on_error: options.abort_on_error,
            piglit_style_dmesg: options.piglit_style_dmesg,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    value.parse::<i64>().ok().map(|v| v != 0)
}

fn compile_regexes(
    kind: &'static str,
    patterns: &[String],
) -> Result<Vec<Regex>, SettingsParseError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|error| SettingsParseError::InvalidRegex {
                kind,
                pattern: pattern.clone(),
                error,
            })
        })
        .collect()
}

/// Makes `path` absolute and resolves symlinks.
///
/// A path that does not exist yet (typically a new results directory) gets its parent resolved
/// instead, with the last component appended.
fn resolve_path(path: &Utf8Path) -> Result<Utf8PathBuf, SettingsParseError> {
    let resolve_error = |error| SettingsParseError::ResolvePath {
        path: path.to_owned(),
        error,
    };

    match path.canonicalize_utf8() {
        Ok(resolved) => return Ok(resolved),
        Err(error) if error.kind() != std::io::ErrorKind::NotFound => {
            return Err(resolve_error(error));
        }
        Err(_) => {}
    }

    let absolute = if path.is_absolute() {
        path.to_owned()
    } else {
        let cwd = std::env::current_dir().map_err(resolve_error)?;
        Utf8PathBuf::try_from(cwd)
            .map_err(SettingsParseError::CurrentDirInvalidUtf8)?
            .join(path)
    };

    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(file_name)) => match parent.canonicalize_utf8() {
            Ok(parent) => Ok(parent.join(file_name)),
            Err(_) => Ok(absolute),
        },
        _ => Ok(absolute),
    }
}
