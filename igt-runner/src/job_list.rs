// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Building the ordered list of jobs for a run.
//!
//! Candidates come either from the test root's catalogue (`test-list.txt`) with each binary asked
//! for its subtests, or from an explicit test list. Each candidate is matched by its piglit name,
//! `igt@<binary>@<subtest>` or `igt@<binary>`, against the include and exclude patterns.

use crate::{
    errors::{JobListError, JobListReadError, JobListWriteError},
    settings::Settings,
};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::Utf8Path;
use igt_runnercomms::IgtExitCode;
use regex::Regex;
use std::{fmt, fs, io::Write};
use swrite::{SWrite, swriteln};
use tracing::{debug, warn};

/// The name of the job list file in a results directory.
pub const JOB_LIST_FILE_NAME: &str = "joblist.txt";

const CATALOGUE_START: &str = "TESTLIST";
const CATALOGUE_END: &str = "END TESTLIST";

/// One unit of scheduled work: a binary and the subtests to run on it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobListEntry {
    /// The binary name, relative to the test root.
    pub binary: String,

    /// Subtest selectors passed to `--run-subtest`. Empty means "run everything".
    ///
    /// Selectors may be globs, and a `!` prefix excludes.
    pub subtests: Vec<String>,
}

impl JobListEntry {
    /// Creates a new entry.
    pub fn new(binary: impl Into<String>, subtests: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            subtests,
        }
    }

    /// Returns the value passed to `--run-subtest`, or `None` if the whole binary runs.
    pub fn run_subtest_arg(&self) -> Option<String> {
        (!self.subtests.is_empty()).then(|| self.subtests.join(","))
    }
}

impl fmt::Display for JobListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.binary)?;
        if !self.subtests.is_empty() {
            write!(f, " ({})", self.subtests.join(", "))?;
        }
        Ok(())
    }
}

/// An ordered list of jobs. Execution order is list order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct JobList {
    /// The entries.
    pub entries: Vec<JobListEntry>,
}

impl JobList {
    /// Builds the job list for `settings`.
    pub fn build(settings: &Settings) -> Result<Self, JobListError> {
        let filter = NameFilter::new(&settings.include_regexes, &settings.exclude_regexes);
        let entries = match &settings.test_list {
            Some(test_list) => from_test_list(test_list, &filter, settings.multiple_mode)?,
            None => from_catalogue(settings, &filter)?,
        };
        debug!("built job list with {} entries", entries.len());
        Ok(Self { entries })
    }

    /// Returns the number of jobs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no jobs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes `joblist.txt` into the results directory.
    pub fn serialize(&self, settings: &Settings) -> Result<(), JobListWriteError> {
        let path = settings.results_path.join(JOB_LIST_FILE_NAME);
        if !settings.overwrite && path.exists() {
            return Err(JobListWriteError::AlreadyExists { path });
        }

        let mut out = String::new();
        for entry in &self.entries {
            swriteln!(out, "{} {}", entry.binary, entry.subtests.len());
            for subtest in &entry.subtests {
                swriteln!(out, "{subtest}");
            }
        }

        AtomicFile::new(&path, OverwriteBehavior::AllowOverwrite)
            .write(|file| file.write_all(out.as_bytes()))
            .map_err(|error| JobListWriteError::Write { path, error })
    }

    /// Reads `joblist.txt` from `results_dir`.
    pub fn deserialize(results_dir: &Utf8Path) -> Result<Self, JobListReadError> {
        let path = results_dir.join(JOB_LIST_FILE_NAME);
        let contents = fs::read_to_string(&path).map_err(|error| JobListReadError::Read {
            path: path.clone(),
            error,
        })?;

        let mut entries = Vec::new();
        let mut lines = contents.lines().enumerate();
        while let Some((index, line)) = lines.next() {
            if line.is_empty() {
                continue;
            }
            let (binary, count) = line.rsplit_once(' ').ok_or_else(|| {
                JobListReadError::parse(&path, index + 1, "expected `<binary> <count>`")
            })?;
            let count: usize = count.parse().map_err(|_| {
                JobListReadError::parse(
                    &path,
                    index + 1,
                    format!("invalid subtest count `{count}`"),
                )
            })?;

            let mut subtests = Vec::with_capacity(count);
            for _ in 0..count {
                let (_, subtest) = lines.next().ok_or_else(|| {
                    JobListReadError::parse(
                        &path,
                        index + 1,
                        format!("`{binary}` declares {count} subtests but the file ended"),
                    )
                })?;
                subtests.push(subtest.to_owned());
            }
            entries.push(JobListEntry::new(binary, subtests));
        }

        Ok(Self { entries })
    }
}

/// Include and exclude patterns applied to piglit names.
#[derive(Clone, Copy, Debug)]
struct NameFilter<'a> {
    include: &'a [Regex],
    exclude: &'a [Regex],
}

impl<'a> NameFilter<'a> {
    fn new(include: &'a [Regex], exclude: &'a [Regex]) -> Self {
        Self { include, exclude }
    }

    fn matches_include(&self, name: &str) -> bool {
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(name))
    }

    fn matches_exclude(&self, name: &str) -> bool {
        self.exclude.iter().any(|re| re.is_match(name))
    }

    fn is_match(&self, name: &str) -> bool {
        self.matches_include(name) && !self.matches_exclude(name)
    }
}

fn piglit_name(binary: &str, subtest: Option<&str>) -> String {
    match subtest {
        Some(subtest) => format!("igt@{binary}@{subtest}"),
        None => format!("igt@{binary}"),
    }
}

fn read_catalogue(path: &Utf8Path) -> Result<Vec<String>, JobListError> {
    let contents = fs::read_to_string(path).map_err(|error| JobListError::NoTestList {
        path: path.to_owned(),
        error,
    })?;

    let malformed = |message| JobListError::MalformedCatalogue {
        path: path.to_owned(),
        message,
    };
    let body = contents
        .trim_end()
        .strip_prefix(CATALOGUE_START)
        .ok_or_else(|| malformed("does not start with TESTLIST"))?
        .strip_suffix(CATALOGUE_END)
        .ok_or_else(|| malformed("does not end with END TESTLIST"))?;

    Ok(body.split_whitespace().map(str::to_owned).collect())
}

/// Asks a binary for its subtests with `--list-subtests`.
///
/// Returns `None` if the binary cannot be executed.
fn list_subtests(test_root: &Utf8Path, binary: &str) -> Option<Vec<String>> {
    let program = test_root.join(binary);
    let expression = duct::cmd(program.as_str(), ["--list-subtests"]);
    debug!("listing subtests: {expression:?}");

    let output = match expression
        .stdout_capture()
        .stderr_null()
        .stdin_null()
        .unchecked()
        .run()
    {
        Ok(output) => output,
        Err(error) => {
            warn!("skipping `{binary}`: failed to execute `{program}`: {error}");
            return None;
        }
    };

    if output.status.code() == Some(IgtExitCode::INVALID) {
        return Some(Vec::new());
    }
    if !output.status.success() {
        debug!("`{program} --list-subtests` exited with {}", output.status);
    }

    Some(
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect(),
    )
}

fn from_catalogue(
    settings: &Settings,
    filter: &NameFilter<'_>,
) -> Result<Vec<JobListEntry>, JobListError> {
    let binaries = read_catalogue(&settings.catalogue_path())?;
    let mut entries = Vec::new();

    for binary in binaries {
        let Some(subtests) = list_subtests(&settings.test_root, &binary) else {
            continue;
        };

        let whole_name = piglit_name(&binary, None);
        if subtests.is_empty() {
            if filter.is_match(&whole_name) {
                entries.push(JobListEntry::new(binary, Vec::new()));
            }
            continue;
        }

        if settings.multiple_mode
            && filter.exclude.is_empty()
            && filter.matches_include(&whole_name)
        {
            entries.push(JobListEntry::new(binary, Vec::new()));
            continue;
        }

        let selected: Vec<String> = subtests
            .into_iter()
            .filter(|subtest| filter.is_match(&piglit_name(&binary, Some(subtest))))
            .collect();

        if settings.multiple_mode {
            if !selected.is_empty() {
                entries.push(JobListEntry::new(binary, selected));
            }
        } else {
            entries.extend(
                selected
                    .into_iter()
                    .map(|subtest| JobListEntry::new(binary.clone(), vec![subtest])),
            );
        }
    }

    Ok(entries)
}

/// Splits a test-list line into binary and optional subtest.
fn parse_test_name(line: &str) -> (&str, Option<&str>) {
    let name = line.strip_prefix("igt@").unwrap_or(line);
    match name.split_once('@') {
        Some((binary, subtest)) => (binary, Some(subtest)),
        None => (name, None),
    }
}

fn from_test_list(
    path: &Utf8Path,
    filter: &NameFilter<'_>,
    multiple_mode: bool,
) -> Result<Vec<JobListEntry>, JobListError> {
    let contents = fs::read_to_string(path).map_err(|error| JobListError::ReadTestList {
        path: path.to_owned(),
        error,
    })?;

    let mut entries: Vec<JobListEntry> = Vec::new();
    // Only the entry just pushed can absorb further subtests.
    let mut mergeable = false;

    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (binary, subtest) = parse_test_name(line);
        if !filter.is_match(&piglit_name(binary, subtest)) {
            continue;
        }

        match subtest {
            None => {
                entries.push(JobListEntry::new(binary, Vec::new()));
                mergeable = false;
            }
            Some(subtest) => {
                if multiple_mode
                    && mergeable
                    && let Some(last) = entries.last_mut().filter(|last| last.binary == binary)
                {
                    last.subtests.push(subtest.to_owned());
                    continue;
                }
                entries.push(JobListEntry::new(binary, vec![subtest.to_owned()]));
                mergeable = multiple_mode;
            }
        }
    }

    Ok(entries)
}
