// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests
//!
//! These run the real binaries: `igt-runner-dup` and friends are copies of the igt-runner-cli
//! binaries, built in this package so that tests can find them through `CARGO_BIN_EXE_*`. The
//! test binaries they execute are built from `test-helpers/` on top of igt-harness.

use igt_runnercomms::{IgtExitCode, RunnerExitCode};
use pretty_assertions::assert_eq;
use std::{os::unix::process::ExitStatusExt, process::Command};
use test_case::test_case;

mod fixtures;

use fixtures::*;

#[test]
fn dry_run_lists_jobs() {
    let root = TestRoot::new(&["successtest", "skippers", "no-subtests"]);

    let output = root.run(&["--dry-run"]).output();
    assert_eq!(
        output.stdout_as_str(),
        indoc::indoc! {"
            successtest (first-subtest)
            successtest (second-subtest)
            skippers (skip-one)
            skippers (skip-two)
            no-subtests
        "}
    );
    assert!(!root.results().exists(), "dry runs leave no results");

    let output = root.run(&["--dry-run", "--multiple-mode"]).output();
    assert_eq!(output.stdout_as_str(), "successtest\nskippers\nno-subtests\n");

    let output = root.run(&["-d", "-x", "skip"]).output();
    assert_eq!(
        output.stdout_as_str(),
        "successtest (first-subtest)\nsuccesstest (second-subtest)\nno-subtests\n"
    );

    let output = root.run(&["-d", "-t", "first", "-t", "skip-two"]).output();
    assert_eq!(
        output.stdout_as_str(),
        "successtest (first-subtest)\nskippers (skip-two)\n"
    );
}

#[test_case(&[], 5, 3 ; "no filters")]
#[test_case(&["-t", "successtest"], 2, 1 ; "include binary")]
#[test_case(&["-x", "successtest"], 3, 2 ; "exclude binary")]
#[test_case(&["-t", "first-subtest"], 1, 1 ; "include subtest")]
#[test_case(&["-x", "second-subtest"], 4, 3 ; "exclude subtest")]
#[test_case(&["-t", "igt@successtest"], 2, 1 ; "include piglit binary")]
#[test_case(&["-t", "igt@successtest@first"], 1, 1 ; "include piglit subtest")]
#[test_case(&["--include-tests=-subtest"], 3, 2 ; "include fragment")]
fn job_list_counts(filters: &[&str], normal: usize, multiple: usize) {
    let root = TestRoot::new(&["successtest", "skippers", "no-subtests"]);

    let mut args = vec!["--dry-run"];
    args.extend_from_slice(filters);
    let output = root.run(&args).output();
    assert_eq!(output.stdout_as_str().lines().count(), normal, "{output}");

    args.push("--multiple-mode");
    let output = root.run(&args).output();
    assert_eq!(output.stdout_as_str().lines().count(), multiple, "{output}");
}

#[test]
fn test_root_from_env() {
    let root = TestRoot::new(&["successtest"]);
    let output = runner()
        .args(["-d", "-m", root.results().as_str()])
        .env("IGT_TEST_ROOT", root.test_root().as_str())
        .output();
    assert_eq!(output.stdout_as_str(), "successtest\n");
}

#[test]
fn run_records_results() {
    let root = TestRoot::new(&["successtest", "skippers", "no-subtests"]);

    let output = root.run(&["--multiple-mode", "--sync"]).output();
    assert_eq!(output.exit_code(), Some(RunnerExitCode::OK), "{output}");
    // Warnings (e.g. about an unreadable /dev/kmsg) may be interleaved with progress lines.
    let progress: Vec<_> = output
        .stderr_as_str()
        .lines()
        .filter(|line| line.starts_with('['))
        .map(str::to_owned)
        .collect();
    assert_eq!(
        progress,
        ["[1/3] successtest", "[2/3] skippers", "[3/3] no-subtests"]
    );

    let results = root.results();
    for file in ["metadata.txt", "joblist.txt", "uname.txt"] {
        assert!(results.join(file).is_file(), "{file} is written");
    }

    check_journal(
        &root.job_file(0, "journal.txt"),
        &["first-subtest", "second-subtest"],
        IgtExitCode::SUCCESS,
    );
    check_journal(
        &root.job_file(1, "journal.txt"),
        &["skip-one", "skip-two"],
        IgtExitCode::SKIP,
    );
    check_journal(&root.job_file(2, "journal.txt"), &[], IgtExitCode::SUCCESS);

    // Log packets from the test land in out.txt.
    let out = root.job_file(0, "out.txt");
    assert!(out.contains("first subtest running"), "out.txt: {out:?}");
    let out = root.job_file(2, "out.txt");
    assert!(out.contains("simple test running"), "out.txt: {out:?}");
}

#[test]
fn test_list_selects_jobs() {
    let root = TestRoot::new(&["successtest", "skippers", "no-subtests"]);
    let test_list = root.write_test_list(indoc::indoc! {"
        # Only a few.
        igt@successtest@second-subtest
        igt@skippers@skip-two

        igt@no-subtests
    "});

    let output = root.run(&["--test-list", test_list.as_str()]).output();
    assert_eq!(output.exit_code(), Some(RunnerExitCode::OK), "{output}");

    check_journal(
        &root.job_file(0, "journal.txt"),
        &["second-subtest"],
        IgtExitCode::SUCCESS,
    );
    check_journal(&root.job_file(1, "journal.txt"), &["skip-two"], IgtExitCode::SKIP);
    check_journal(&root.job_file(2, "journal.txt"), &[], IgtExitCode::SUCCESS);
    assert!(!root.has_job_dir(3));
}

#[test]
fn abort_on_error_then_resume() {
    let root = TestRoot::new(&["dynamic-subtests", "successtest"]);

    let output = root
        .run(&["-m", "--abort-on-monitored-error"])
        .unchecked(true)
        .output();
    assert_eq!(output.exit_code(), Some(RunnerExitCode::ABORTED), "{output}");
    check_journal(
        &root.job_file(0, "journal.txt"),
        &["passing", "per-pipe"],
        IgtExitCode::FAILURE,
    );
    assert!(!root.has_job_dir(1), "the run stopped after the failure");

    let output = resume().arg(root.results().as_str()).output();
    assert_eq!(output.exit_code(), Some(RunnerExitCode::OK), "{output}");
    check_journal(
        &root.job_file(1, "journal.txt"),
        &["first-subtest", "second-subtest"],
        IgtExitCode::SUCCESS,
    );

    // Nothing left to do.
    let output = resume().arg(root.results().as_str()).output();
    assert_eq!(output.exit_code(), Some(RunnerExitCode::OK), "{output}");
    assert!(!root.has_job_dir(2));
}

#[test]
fn abort_exit_code_stops_run() {
    let root = TestRoot::new(&["aborttest", "successtest"]);

    let output = root.run(&["-m"]).unchecked(true).output();
    assert_eq!(output.exit_code(), Some(RunnerExitCode::ABORTED), "{output}");

    let journal = root.job_file(0, "journal.txt");
    assert!(journal.starts_with("abort-now\n"), "journal: {journal:?}");
    assert!(journal.contains(&format!("exit:{} (", IgtExitCode::ABORT)), "journal: {journal:?}");
    assert!(!journal.contains("never-runs"), "journal: {journal:?}");
    assert!(!root.has_job_dir(1));
}

#[test]
fn existing_results_are_refused() {
    let root = TestRoot::new(&["no-subtests"]);
    root.run(&[]).output();

    let output = root.run(&[]).unchecked(true).output();
    assert_eq!(
        output.exit_code(),
        Some(RunnerExitCode::SETUP_ERROR),
        "{output}"
    );

    let output = root.run(&["--overwrite"]).output();
    assert_eq!(output.exit_code(), Some(RunnerExitCode::OK), "{output}");
    check_journal(&root.job_file(0, "journal.txt"), &[], IgtExitCode::SUCCESS);
}

#[test]
fn invalid_arguments() {
    let root = TestRoot::new(&["successtest"]);

    let output = runner().unchecked(true).output();
    assert_eq!(
        output.exit_code(),
        Some(RunnerExitCode::INVALID_ARGUMENTS),
        "{output}"
    );

    let output = root.run(&["-t", "("]).unchecked(true).output();
    assert_eq!(
        output.exit_code(),
        Some(RunnerExitCode::INVALID_ARGUMENTS),
        "{output}"
    );

    // One path and no IGT_TEST_ROOT.
    let output = runner()
        .arg(root.results().as_str())
        .unchecked(true)
        .output();
    assert_eq!(
        output.exit_code(),
        Some(RunnerExitCode::INVALID_ARGUMENTS),
        "{output}"
    );
}

#[test]
fn decode_comms() {
    let root = TestRoot::new(&["successtest"]);
    root.run(&["-m"]).output();

    let comms = root.results().join("0").join("comms");
    let output = decoder().arg(comms.as_str()).output();
    let stdout = output.stdout_as_str();
    let kinds: Vec<_> = stdout
        .lines()
        .filter_map(|line| line.split_once(") ").map(|(_, rest)| rest))
        .filter_map(|rest| rest.split('\t').next())
        .collect();
    assert_eq!(kinds.first(), Some(&"EXEC"), "decoded: {stdout}");
    assert_eq!(kinds.last(), Some(&"EXIT"), "decoded: {stdout}");
    for expected in [
        "VERSIONSTRING",
        "SUBTEST_START\tname=first-subtest",
        "SUBTEST_RESULT\tname=second-subtest,result=SUCCESS",
        "LOG\tstream=1,text=first subtest running",
        "EXIT\texitcode=0,timeused=",
    ] {
        assert!(stdout.contains(expected), "missing {expected:?} in: {stdout}");
    }

    let output = decoder()
        .arg(root.results().join("nonexistent").as_str())
        .unchecked(true)
        .output();
    assert_eq!(
        output.exit_code(),
        Some(RunnerExitCode::EXECUTION_FAILED),
        "{output}"
    );
}

#[test]
fn harness_standalone() {
    let run = |name: &str, args: &[&str]| {
        Command::new(fixture_bin(name))
            .args(args)
            .env_remove("IGT_RUNNER_SOCKET")
            .output()
            .expect("fixture ran")
    };

    let output = run("successtest", &["--list-subtests"]);
    assert_eq!(output.status.code(), Some(IgtExitCode::SUCCESS));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "first-subtest\nsecond-subtest\n"
    );

    let output = run("no-subtests", &["--list-subtests"]);
    assert_eq!(output.status.code(), Some(IgtExitCode::INVALID));

    let output = run("successtest", &["--run-subtest", "second-*"]);
    assert_eq!(output.status.code(), Some(IgtExitCode::SUCCESS));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Starting subtest: second-subtest"), "{stdout}");
    assert!(stdout.contains("Subtest second-subtest: SUCCESS ("), "{stdout}");
    assert!(!stdout.contains("first-subtest"), "{stdout}");

    let output = run("successtest", &["--run-subtest", "no-such-subtest"]);
    assert_eq!(output.status.code(), Some(IgtExitCode::INVALID));

    let output = run("skippers", &[]);
    assert_eq!(output.status.code(), Some(IgtExitCode::SKIP));

    let output = run("dynamic-subtests", &[]);
    assert_eq!(output.status.code(), Some(IgtExitCode::FAILURE));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Dynamic subtest pipe-B: FAIL ("), "{stdout}");

    let output = run("aborttest", &[]);
    assert_eq!(output.status.code(), Some(IgtExitCode::ABORT));
}

#[test_case("nested-subtest", None ; "subtest inside subtest")]
#[test_case("dynamic-outside", None ; "dynamic subtest outside container")]
#[test_case("bad-dynamic-name", None ; "invalid dynamic name")]
#[test_case("top-level-fail", None ; "failure outside subtests")]
#[test_case("empty-dynamic", Some(IgtExitCode::SKIP) ; "container without dynamic subtests")]
#[test_case("thread-failure", Some(IgtExitCode::FAILURE) ; "failure from another thread")]
#[test_case("simple-skip", Some(IgtExitCode::SKIP) ; "simple test skips")]
#[test_case("simple-fail", Some(IgtExitCode::FAILURE) ; "simple test fails")]
fn harness_scenarios(scenario: &str, exit_code: Option<i32>) {
    let output = Command::new(fixture_bin("harness-scenarios"))
        .env("HARNESS_SCENARIO", scenario)
        .env_remove("IGT_RUNNER_SOCKET")
        .output()
        .expect("fixture ran");

    match exit_code {
        Some(code) => assert_eq!(output.status.code(), Some(code), "{output:?}"),
        None => {
            // Harness misuse is a programming error: the process aborts.
            assert_eq!(output.status.signal(), Some(libc::SIGABRT), "{output:?}");
            let stderr = String::from_utf8_lossy(&output.stderr);
            assert!(stderr.contains("CRITICAL"), "{stderr}");
        }
    }

    if scenario == "thread-failure" {
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("Subtest threaded: FAIL ("), "{stdout}");
        assert!(stdout.contains("Subtest clean: SUCCESS ("), "{stdout}");
    }
}
