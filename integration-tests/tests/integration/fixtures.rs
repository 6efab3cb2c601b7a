// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use fs_err as fs;
use integration_tests::runner_cli::RunnerCli;

/// Test binaries built from `test-helpers/`, by the name they get in a test root.
pub const FIXTURE_BINARIES: [(&str, &str); 6] = [
    ("successtest", env!("CARGO_BIN_EXE_successtest")),
    ("skippers", env!("CARGO_BIN_EXE_skippers")),
    ("no-subtests", env!("CARGO_BIN_EXE_no-subtests")),
    ("dynamic-subtests", env!("CARGO_BIN_EXE_dynamic-subtests")),
    ("aborttest", env!("CARGO_BIN_EXE_aborttest")),
    ("harness-scenarios", env!("CARGO_BIN_EXE_harness-scenarios")),
];

pub fn fixture_bin(name: &str) -> &'static str {
    FIXTURE_BINARIES
        .iter()
        .find(|(fixture, _)| *fixture == name)
        .map(|(_, path)| *path)
        .unwrap_or_else(|| panic!("unknown fixture binary `{name}`"))
}

pub fn runner() -> RunnerCli {
    RunnerCli::new(env!("CARGO_BIN_EXE_igt-runner-dup"))
}

pub fn resume() -> RunnerCli {
    RunnerCli::new(env!("CARGO_BIN_EXE_igt-resume-dup"))
}

pub fn decoder() -> RunnerCli {
    RunnerCli::new(env!("CARGO_BIN_EXE_igt-comms-decoder-dup"))
}

/// A temporary test root whose catalogue lists `binaries`, with a sibling results path.
#[derive(Debug)]
pub struct TestRoot {
    temp_dir: Utf8TempDir,
    test_root: Utf8PathBuf,
}

impl TestRoot {
    pub fn new(binaries: &[&str]) -> Self {
        let temp_dir = camino_tempfile::Builder::new()
            .prefix("igt-runner-test-")
            .tempdir()
            .expect("created temp dir");
        let test_root = temp_dir.path().join("tests");
        fs::create_dir(&test_root).unwrap();

        for binary in binaries {
            std::os::unix::fs::symlink(fixture_bin(binary), test_root.join(binary))
                .expect("symlinked fixture binary");
        }
        fs::write(
            test_root.join("test-list.txt"),
            format!("TESTLIST\n{}\nEND TESTLIST\n", binaries.join(" ")),
        )
        .unwrap();

        Self {
            temp_dir,
            test_root,
        }
    }

    pub fn test_root(&self) -> &Utf8Path {
        &self.test_root
    }

    pub fn results(&self) -> Utf8PathBuf {
        self.temp_dir.path().join("results")
    }

    /// Writes a test list for `--test-list` and returns its path.
    pub fn write_test_list(&self, contents: &str) -> Utf8PathBuf {
        let path = self.temp_dir.path().join("selected.txt");
        fs::write(&path, contents).unwrap();
        path
    }

    /// Runs `igt_runner` with `args`, then the test root and results path.
    pub fn run(&self, args: &[&str]) -> RunnerCli {
        let mut cli = runner();
        cli.args(args.iter().copied())
            .args([self.test_root.as_str(), self.results().as_str()]);
        cli
    }

    pub fn job_file(&self, index: usize, name: &str) -> String {
        let path = self.results().join(index.to_string()).join(name);
        fs::read_to_string(&path).unwrap()
    }

    pub fn has_job_dir(&self, index: usize) -> bool {
        self.results().join(index.to_string()).is_dir()
    }
}

/// Checks that `journal` holds `lines` and then an exit line with `code`.
#[track_caller]
pub fn check_journal(journal: &str, lines: &[&str], code: i32) {
    let subtests: String = lines.iter().map(|line| format!("{line}\n")).collect();
    let expected = format!("{subtests}exit:{code} (");
    assert!(
        journal.starts_with(&expected),
        "journal should start with {expected:?}, but is {journal:?}"
    );
    assert!(journal.ends_with("s)\n"), "journal ends with a time: {journal:?}");
    assert_eq!(
        journal.lines().count(),
        lines.len() + 1,
        "no lines after the exit line: {journal:?}"
    );
}
