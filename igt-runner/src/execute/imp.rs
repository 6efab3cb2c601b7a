// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    monitor::{JobEnd, JobOutcome, MonitorContext, monitor_job},
    process::spawn_test,
    result_dir::{JobOutputs, clear_old_results, highest_job_dir, job_dir, write_uname},
};
use crate::{
    dmesg::KmsgReader,
    errors::{ExecuteError, InitializeError, ResumeError},
    job_list::{JobList, JobListEntry},
    journal::{JOURNAL_FILE_NAME, JournalLine, JournalReplay, ReplayOutcome},
    reporter::ExecuteReporter,
    results::ResultTracker,
    settings::Settings,
    signal::{ShutdownEvent, SignalHandler, SignalHandlerKind},
    time::stopwatch,
    watchdog::{TimeoutPlan, WATCHDOG_LEEWAY_SECS, Watchdogs},
};
use camino::Utf8Path;
use igt_runnercomms::{IgtExitCode, RunnerPacket};
use std::{fmt, fs, io, time::Duration};
use tracing::{debug, info};

/// Where a run stands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutePhase {
    /// Created by [`ExecuteState::initialize`]. Nothing has run yet.
    Fresh,
    /// Reconstructed from a results directory by [`ExecuteState::from_resume`].
    Resumed,
    /// [`execute`] is in progress, or stopped early.
    Running,
    /// Every job has run.
    Complete,
}

/// The position of a run within its job list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecuteState {
    next: usize,
    phase: ExecutePhase,
}

impl ExecuteState {
    /// Prepares a new run: validates `settings` and writes `metadata.txt` and `joblist.txt`.
    ///
    /// With `overwrite`, results of an earlier run in the same directory are removed.
    pub fn initialize(settings: &Settings, job_list: &JobList) -> Result<Self, InitializeError> {
        settings.validate()?;
        settings.serialize()?;
        job_list.serialize(settings)?;

        if settings.overwrite {
            clear_old_results(&settings.results_path).map_err(|error| {
                InitializeError::ClearResults {
                    path: settings.results_path.clone(),
                    error,
                }
            })?;
        }

        Ok(Self {
            next: 0,
            phase: ExecutePhase::Fresh,
        })
    }

    /// Reconstructs a run from `results_dir`.
    ///
    /// The job at the highest-numbered result directory is examined: if its journal shows it
    /// finished, the run continues with the job after it. Otherwise the job is run again,
    /// excluding every subtest that was already started.
    pub fn from_resume(results_dir: &Utf8Path) -> Result<(Self, Settings, JobList), ResumeError> {
        let settings = Settings::deserialize(results_dir)?;
        let mut job_list = JobList::deserialize(results_dir)?;

        let next = match highest_job_dir(results_dir, job_list.len()) {
            None => 0,
            Some(index) if index >= job_list.len() => job_list.len(),
            Some(index) => {
                let path = job_dir(results_dir, index).join(JOURNAL_FILE_NAME);
                match fs::read_to_string(&path) {
                    Ok(contents) => {
                        let entry = &mut job_list.entries[index];
                        match JournalReplay::parse(&contents).outcome(&entry.subtests) {
                            ReplayOutcome::Complete { .. } | ReplayOutcome::NothingToResume => {
                                index + 1
                            }
                            ReplayOutcome::Interrupted { pruned } => {
                                debug!("resuming {} with {pruned:?}", entry.binary);
                                entry.subtests = pruned;
                                index
                            }
                        }
                    }
                    Err(error) if error.kind() == io::ErrorKind::NotFound => index,
                    Err(error) => return Err(ResumeError::Journal { path, error }),
                }
            }
        };

        let state = Self {
            next,
            phase: ExecutePhase::Resumed,
        };
        Ok((state, settings, job_list))
    }

    /// Returns the index of the next job to run.
    pub fn next(&self) -> usize {
        self.next
    }

    /// Returns the phase of the run.
    pub fn phase(&self) -> ExecutePhase {
        self.phase
    }
}

/// Why a run stopped before its last job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbortReason {
    /// A test exited with [`IgtExitCode::ABORT`].
    AbortExitCode,
    /// A test failed or crashed and `abort_on_error` is set.
    TestFailed,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AbortExitCode => {
                write!(f, "test requested abort (exit code {})", IgtExitCode::ABORT)
            }
            Self::TestFailed => write!(f, "a test failed and --abort-on-error is set"),
        }
    }
}

/// How a call to [`execute`] ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExecuteOutcome {
    /// Every job ran.
    Completed,

    /// The run stopped after job `index`.
    Aborted {
        /// The index of the job that caused the abort.
        index: usize,
        /// Why.
        reason: AbortReason,
    },

    /// The runner received a signal. The current job's journal has no exit line.
    Interrupted {
        /// The signal received.
        event: ShutdownEvent,
    },

    /// The overall time limit passed before every job was started.
    OverallTimeout {
        /// The limit.
        limit: Duration,
    },
}

/// Runs jobs from `state.next()` until the job list is exhausted or the run stops.
///
/// `state` and `job_list` are updated as the run progresses. After an inactivity timeout, both
/// are reloaded from the results directory so the timed-out job resumes after its last started
/// subtest.
pub async fn execute(
    state: &mut ExecuteState,
    settings: &Settings,
    job_list: &mut JobList,
    signal_handler: SignalHandlerKind,
    reporter: &mut ExecuteReporter<'_>,
) -> Result<ExecuteOutcome, ExecuteError> {
    let mut signal_handler = signal_handler.build()?;
    let run_stopwatch = stopwatch();

    write_uname(&settings.results_path)?;

    let mut watchdogs = if settings.use_watchdog && settings.inactivity_timeout > 0 {
        Watchdogs::open()
    } else {
        Watchdogs::none()
    };
    let (timeout_plan, watchdog_timeout) = arm_watchdogs(&mut watchdogs, settings, reporter)?;

    state.phase = ExecutePhase::Running;
    let mut executed = 0;
    let overall_limit =
        (settings.overall_timeout > 0).then(|| Duration::from_secs(settings.overall_timeout));

    let outcome = loop {
        let index = state.next;
        let Some(entry) = job_list.entries.get(index) else {
            state.phase = ExecutePhase::Complete;
            break ExecuteOutcome::Completed;
        };
        if let Some(limit) = overall_limit
            && run_stopwatch.exceeded(limit)
        {
            break ExecuteOutcome::OverallTimeout { limit };
        }

        let mut outputs = JobOutputs::open(&settings.results_path, index, settings.sync)?;
        reporter
            .job_started(index, job_list.len(), entry)
            .map_err(ExecuteError::Reporter)?;

        let job = JobRun {
            settings,
            entry,
            timeout_plan,
            watchdogs: &mut watchdogs,
            signal_handler: &mut signal_handler,
        };
        let JobOutcome { end, tracker } = job.run(&mut outputs, reporter).await?;
        executed += 1;

        match end {
            JobEnd::Interrupted { event } => break ExecuteOutcome::Interrupted { event },
            JobEnd::TimedOut { code } => {
                info!("{} timed out (exit code {code}), reloading state", entry.binary);
                let (resumed, _, resumed_list) =
                    ExecuteState::from_resume(&settings.results_path)?;
                state.next = resumed.next;
                *job_list = resumed_list;
                if let Some(secs) = watchdog_timeout {
                    watchdogs.set_timeout(secs);
                }
            }
            JobEnd::Exited { code } => {
                state.next = index + 1;
                if code == IgtExitCode::ABORT {
                    break ExecuteOutcome::Aborted {
                        index,
                        reason: AbortReason::AbortExitCode,
                    };
                }
                let failed =
                    code == IgtExitCode::FAILURE || code < 0 || tracker.has_failure();
                if settings.abort_on_error && failed {
                    break ExecuteOutcome::Aborted {
                        index,
                        reason: AbortReason::TestFailed,
                    };
                }
            }
        }
    };

    if !watchdogs.is_empty() {
        reporter.watchdogs_closed().map_err(ExecuteError::Reporter)?;
        watchdogs.close();
    }
    reporter
        .run_finished(&outcome, executed, &run_stopwatch.snapshot())
        .map_err(ExecuteError::Reporter)?;
    Ok(outcome)
}

/// Sets the watchdog timeout and plans the inactivity waits around what the devices accept.
///
/// Returns the plan (`None` if inactivity timeouts are off) and the timeout to restore on the
/// watchdogs after a kill.
fn arm_watchdogs(
    watchdogs: &mut Watchdogs,
    settings: &Settings,
    reporter: &mut ExecuteReporter<'_>,
) -> Result<(Option<TimeoutPlan>, Option<i32>), ExecuteError> {
    let timeout = settings.inactivity_timeout;
    if timeout == 0 {
        return Ok((None, None));
    }
    let single = TimeoutPlan {
        interval_secs: timeout,
        intervals: 1,
    };
    if watchdogs.is_empty() {
        return Ok((Some(single), None));
    }

    reporter
        .watchdogs_opened(&watchdogs.paths())
        .map_err(ExecuteError::Reporter)?;
    let requested = i32::try_from(timeout)
        .unwrap_or(i32::MAX)
        .saturating_add(WATCHDOG_LEEWAY_SECS);
    let accepted = watchdogs.set_timeout(requested);
    let plan = TimeoutPlan::new(timeout, accepted);
    if plan.is_split() {
        reporter
            .watchdog_timeout_shortened(accepted, plan.intervals, plan.interval_secs)
            .map_err(ExecuteError::Reporter)?;
    }
    Ok((Some(plan), Some(accepted)))
}

/// One job's run, from spawn to the journal's exit line.
struct JobRun<'a> {
    settings: &'a Settings,
    entry: &'a JobListEntry,
    timeout_plan: Option<TimeoutPlan>,
    watchdogs: &'a mut Watchdogs,
    signal_handler: &'a mut SignalHandler,
}

impl JobRun<'_> {
    async fn run(
        self,
        outputs: &mut JobOutputs,
        reporter: &mut ExecuteReporter<'_>,
    ) -> Result<JobOutcome, ExecuteError> {
        let program = self.settings.test_root.join(&self.entry.binary);
        let args: Vec<String> = match self.entry.run_subtest_arg() {
            Some(arg) => vec!["--run-subtest".to_owned(), arg],
            None => Vec::new(),
        };

        let argv = std::iter::once(program.as_str()).chain(args.iter().map(String::as_str));
        outputs.comms_packet(RunnerPacket::exec(argv).as_bytes())?;

        let mut kmsg = KmsgReader::open();
        let process = match spawn_test(&program, &args) {
            Ok(process) => process,
            Err(error) => {
                outputs.stderr(format!("Cannot execute {program}: {error}\n").as_bytes())?;
                outputs.journal_line(JournalLine::Exit {
                    code: IgtExitCode::INVALID,
                    time: Some(Duration::ZERO),
                })?;
                reporter
                    .spawn_failed(&program, &error)
                    .map_err(ExecuteError::Reporter)?;
                return Ok(JobOutcome {
                    end: JobEnd::Exited {
                        code: IgtExitCode::INVALID,
                    },
                    tracker: ResultTracker::new(),
                });
            }
        };

        let cx = MonitorContext {
            binary: &self.entry.binary,
            timeout_plan: self.timeout_plan,
            watchdogs: self.watchdogs,
            signal_handler: self.signal_handler,
            reporter,
        };
        let outcome = monitor_job(process, outputs, cx).await;
        outputs.append_dmesg(&mut kmsg)?;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reporter::{ReporterBuilder, ReporterStderr},
        settings::{LogLevel, SettingsOptions},
    };
    use camino_tempfile::{Utf8TempDir, tempdir};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Utf8Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// A test root whose binaries report through stdout only.
    fn test_root() -> Utf8TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("test-list.txt"), "TESTLIST\nEND TESTLIST\n").unwrap();
        write_script(
            dir.path(),
            "successtest",
            indoc! {r#"
                if [ "$1" = "--list-subtests" ]; then
                    echo first-subtest
                    echo second-subtest
                    exit 0
                fi
                echo "Starting subtest: first-subtest"
                echo "Subtest first-subtest: SUCCESS (0.000s)"
                echo "Starting subtest: second-subtest"
                echo "Subtest second-subtest: SUCCESS (0.000s)"
                echo "to stderr" >&2
            "#},
        );
        write_script(
            dir.path(),
            "failtest",
            indoc! {r#"
                [ "$1" = "--list-subtests" ] && exit 79
                echo "Subtest fail-one: FAIL (0.000s)"
                exit 98
            "#},
        );
        write_script(
            dir.path(),
            "aborttest",
            indoc! {r#"
                [ "$1" = "--list-subtests" ] && exit 79
                exit 112
            "#},
        );
        write_script(
            dir.path(),
            "hangtest",
            indoc! {r#"
                if [ "$1" = "--list-subtests" ]; then
                    echo hang-one
                    echo hang-two
                    exit 0
                fi
                case "$2" in
                    *'!hang-one'*)
                        echo "Starting subtest: hang-two"
                        echo "Subtest hang-two: SUCCESS (0.000s)"
                        exit 0
                        ;;
                esac
                echo "Starting subtest: hang-one"
                exec sleep 60
            "#},
        );
        dir
    }

    fn settings(root: &Utf8Path, configure: impl FnOnce(&mut SettingsOptions)) -> Settings {
        let mut options = SettingsOptions {
            test_root: Some(root.to_owned()),
            results_path: root.join("results"),
            ..Default::default()
        };
        configure(&mut options);
        Settings::from_options(options).unwrap()
    }

    fn job_list(entries: &[(&str, &[&str])]) -> JobList {
        JobList {
            entries: entries
                .iter()
                .map(|(binary, subtests)| {
                    JobListEntry::new(*binary, subtests.iter().map(|s| (*s).to_owned()).collect())
                })
                .collect(),
        }
    }

    async fn run(
        settings: &Settings,
        state: &mut ExecuteState,
        job_list: &mut JobList,
    ) -> (ExecuteOutcome, String) {
        let mut buf = Vec::new();
        let mut reporter = ReporterBuilder::default()
            .set_log_level(LogLevel::Normal)
            .build(ReporterStderr::Buffer(&mut buf));
        let outcome = execute(state, settings, job_list, SignalHandlerKind::Noop, &mut reporter)
            .await
            .unwrap();
        (outcome, String::from_utf8(buf).unwrap())
    }

    fn journal(settings: &Settings, index: usize) -> String {
        fs::read_to_string(job_dir(&settings.results_path, index).join(JOURNAL_FILE_NAME)).unwrap()
    }

    /// Strips the timing from `exit:<code> (<secs>s)` lines.
    fn without_times(journal: &str) -> String {
        journal
            .lines()
            .map(|line| line.split(" (").next().unwrap_or(line))
            .map(|line| format!("{line}\n"))
            .collect()
    }

    #[tokio::test]
    async fn runs_every_job() {
        let root = test_root();
        let settings = settings(root.path(), |_| {});
        let mut list = job_list(&[("successtest", &[]), ("failtest", &[])]);
        let mut state = ExecuteState::initialize(&settings, &list).unwrap();
        assert_eq!(state.phase(), ExecutePhase::Fresh);

        let (outcome, output) = run(&settings, &mut state, &mut list).await;
        assert_eq!(outcome, ExecuteOutcome::Completed);
        assert_eq!(state.next(), 2);
        assert_eq!(state.phase(), ExecutePhase::Complete);
        assert_eq!(output, "[1/2] successtest\n[2/2] failtest\n");

        assert_eq!(
            without_times(&journal(&settings, 0)),
            "first-subtest\nsecond-subtest\nexit:0\n"
        );
        // A result without a matching start is journaled too.
        assert_eq!(without_times(&journal(&settings, 1)), "fail-one\nexit:98\n");

        let job = job_dir(&settings.results_path, 0);
        assert_eq!(
            fs::read_to_string(job.join("err.txt")).unwrap(),
            "to stderr\n"
        );
        assert!(settings.results_path.join("uname.txt").is_file());
    }

    #[tokio::test]
    async fn passes_selectors() {
        let root = test_root();
        write_script(root.path(), "argtest", r#"echo "$@""#);
        let settings = settings(root.path(), |_| {});
        let mut list = job_list(&[("argtest", &["first", "second*"])]);
        let mut state = ExecuteState::initialize(&settings, &list).unwrap();
        run(&settings, &mut state, &mut list).await;

        let out = fs::read_to_string(job_dir(&settings.results_path, 0).join("out.txt")).unwrap();
        assert_eq!(out, "--run-subtest first,second*\n");
    }

    #[tokio::test]
    async fn abort_exit_code_stops_run() {
        let root = test_root();
        let settings = settings(root.path(), |_| {});
        let mut list = job_list(&[("aborttest", &[]), ("successtest", &[])]);
        let mut state = ExecuteState::initialize(&settings, &list).unwrap();

        let (outcome, _) = run(&settings, &mut state, &mut list).await;
        assert_eq!(
            outcome,
            ExecuteOutcome::Aborted {
                index: 0,
                reason: AbortReason::AbortExitCode
            }
        );
        assert!(!job_dir(&settings.results_path, 1).exists());
    }

    #[tokio::test]
    async fn abort_on_error() {
        let root = test_root();
        let settings = settings(root.path(), |options| options.abort_on_error = true);
        let mut list = job_list(&[("failtest", &[]), ("successtest", &[])]);
        let mut state = ExecuteState::initialize(&settings, &list).unwrap();

        let (outcome, _) = run(&settings, &mut state, &mut list).await;
        assert_eq!(
            outcome,
            ExecuteOutcome::Aborted {
                index: 0,
                reason: AbortReason::TestFailed
            }
        );
        assert_eq!(state.next(), 1);
    }

    #[tokio::test]
    async fn abort_on_error_simple_failure() {
        let root = test_root();
        write_script(root.path(), "simplefail", "exit 98");
        let settings = settings(root.path(), |options| options.abort_on_error = true);
        let mut list = job_list(&[("simplefail", &[]), ("successtest", &[])]);
        let mut state = ExecuteState::initialize(&settings, &list).unwrap();

        let (outcome, _) = run(&settings, &mut state, &mut list).await;
        assert_eq!(
            outcome,
            ExecuteOutcome::Aborted {
                index: 0,
                reason: AbortReason::TestFailed
            }
        );
        assert!(!job_dir(&settings.results_path, 1).exists());
    }

    #[tokio::test]
    async fn abort_on_error_crash_mid_subtest() {
        let root = test_root();
        write_script(
            root.path(),
            "crashtest",
            indoc! {r#"
                echo "Starting subtest: crashing"
                kill -SEGV $$
            "#},
        );
        let settings = settings(root.path(), |options| options.abort_on_error = true);
        let mut list = job_list(&[("crashtest", &[]), ("successtest", &[])]);
        let mut state = ExecuteState::initialize(&settings, &list).unwrap();

        let (outcome, _) = run(&settings, &mut state, &mut list).await;
        assert_eq!(
            outcome,
            ExecuteOutcome::Aborted {
                index: 0,
                reason: AbortReason::TestFailed
            }
        );
        assert_eq!(without_times(&journal(&settings, 0)), "crashing\nexit:-11\n");
    }

    #[tokio::test]
    async fn missing_binary_is_recorded() {
        let root = test_root();
        let settings = settings(root.path(), |_| {});
        let mut list = job_list(&[("does-not-exist", &[]), ("successtest", &[])]);
        let mut state = ExecuteState::initialize(&settings, &list).unwrap();

        let (outcome, output) = run(&settings, &mut state, &mut list).await;
        assert_eq!(outcome, ExecuteOutcome::Completed);
        assert!(output.contains("Cannot execute"), "output: {output}");
        assert_eq!(journal(&settings, 0), "exit:79 (0.000s)\n");
        let err = fs::read_to_string(job_dir(&settings.results_path, 0).join("err.txt")).unwrap();
        assert!(err.starts_with("Cannot execute "), "err.txt: {err}");
    }

    #[tokio::test]
    async fn inactivity_timeout_resumes_after_started_subtest() {
        let root = test_root();
        let settings = settings(root.path(), |options| options.inactivity_timeout = 1);
        let mut list = job_list(&[("hangtest", &[])]);
        let mut state = ExecuteState::initialize(&settings, &list).unwrap();

        let (outcome, output) = run(&settings, &mut state, &mut list).await;
        assert_eq!(outcome, ExecuteOutcome::Completed);
        assert!(
            output.contains("Timeout. Killing the current test with SIGTERM."),
            "output: {output}"
        );
        // The same directory is reused, and the resumed child skips the started subtest.
        assert_eq!(
            without_times(&journal(&settings, 0)),
            "hang-one\ntimeout:-15\nhang-two\nexit:0\n"
        );
        assert_eq!(list.entries[0].subtests, ["*", "!hang-one"]);
        assert_eq!(state.next(), 1);
    }

    #[tokio::test]
    async fn repeated_timeout_moves_on() {
        let root = test_root();
        write_script(
            root.path(),
            "stucktest",
            indoc! {r#"
                case "$2" in
                    *'!hang-one'*) exec sleep 60 ;;
                esac
                echo "Starting subtest: hang-one"
                exec sleep 60
            "#},
        );
        let settings = settings(root.path(), |options| options.inactivity_timeout = 1);
        let mut list = job_list(&[("stucktest", &[]), ("successtest", &[])]);
        let mut state = ExecuteState::initialize(&settings, &list).unwrap();

        let (outcome, _) = run(&settings, &mut state, &mut list).await;
        assert_eq!(outcome, ExecuteOutcome::Completed);
        assert_eq!(
            without_times(&journal(&settings, 0)),
            "hang-one\ntimeout:-15\ntimeout:-15\n"
        );
        assert_eq!(
            without_times(&journal(&settings, 1)),
            "first-subtest\nsecond-subtest\nexit:0\n"
        );
        assert_eq!(state.next(), 2);
    }

    #[tokio::test]
    async fn overall_timeout_stops_before_next_job() {
        let root = test_root();
        write_script(root.path(), "slowtest", "sleep 2");
        let settings = settings(root.path(), |options| options.overall_timeout = 1);
        let mut list = job_list(&[("slowtest", &[]), ("successtest", &[])]);
        let mut state = ExecuteState::initialize(&settings, &list).unwrap();

        let (outcome, _) = run(&settings, &mut state, &mut list).await;
        assert_eq!(
            outcome,
            ExecuteOutcome::OverallTimeout {
                limit: Duration::from_secs(1)
            }
        );
        assert_eq!(state.next(), 1);
        assert!(!job_dir(&settings.results_path, 1).exists());
    }

    #[test]
    fn resume_rules() {
        let root = test_root();
        let settings = settings(root.path(), |_| {});
        let list = job_list(&[("successtest", &[]), ("skippers", &["skip-*"]), ("failtest", &[])]);
        ExecuteState::initialize(&settings, &list).unwrap();
        let results = &settings.results_path;

        // Nothing ran yet.
        let (state, resumed_settings, resumed_list) = ExecuteState::from_resume(results).unwrap();
        assert_eq!(state.next(), 0);
        assert_eq!(state.phase(), ExecutePhase::Resumed);
        assert_eq!(resumed_list, list);
        assert_eq!(resumed_settings.results_path, settings.results_path);

        // A directory without a journal is run again from the start.
        fs::create_dir_all(job_dir(results, 0)).unwrap();
        let (state, _, _) = ExecuteState::from_resume(results).unwrap();
        assert_eq!(state.next(), 0);

        // A finished job moves on.
        fs::write(job_dir(results, 0).join(JOURNAL_FILE_NAME), "first-subtest\nexit:0 (0.100s)\n")
            .unwrap();
        let (state, _, _) = ExecuteState::from_resume(results).unwrap();
        assert_eq!(state.next(), 1);

        // An interrupted job is pruned.
        fs::create_dir_all(job_dir(results, 1)).unwrap();
        fs::write(job_dir(results, 1).join(JOURNAL_FILE_NAME), "skip-one\n").unwrap();
        let (state, _, resumed_list) = ExecuteState::from_resume(results).unwrap();
        assert_eq!(state.next(), 1);
        assert_eq!(resumed_list.entries[1].subtests, ["skip-*", "!skip-one"]);

        // A crash before any subtest started moves on.
        fs::create_dir_all(job_dir(results, 2)).unwrap();
        fs::write(job_dir(results, 2).join(JOURNAL_FILE_NAME), "").unwrap();
        let (state, _, _) = ExecuteState::from_resume(results).unwrap();
        assert_eq!(state.next(), 3);

        // Directories past the end of the list clamp.
        fs::create_dir_all(job_dir(results, 3)).unwrap();
        let (state, _, _) = ExecuteState::from_resume(results).unwrap();
        assert_eq!(state.next(), 3);
    }

    #[test]
    fn initialize_refuses_existing_results() {
        let root = test_root();
        let settings = settings(root.path(), |_| {});
        let list = job_list(&[("successtest", &[])]);
        ExecuteState::initialize(&settings, &list).unwrap();
        fs::create_dir_all(job_dir(&settings.results_path, 0)).unwrap();

        let err = ExecuteState::initialize(&settings, &list).unwrap_err();
        assert!(matches!(err, InitializeError::Settings(_)), "{err:?}");

        let overwrite = Settings {
            overwrite: true,
            ..settings.clone()
        };
        ExecuteState::initialize(&overwrite, &list).unwrap();
        assert!(!job_dir(&settings.results_path, 0).exists());
    }
}
