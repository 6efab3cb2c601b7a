// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts, OutputWriter},
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, ValueEnum};
use igt_runner::{
    ExecuteOutcome, ExecuteState, JobList, LogLevel, Settings, SettingsOptions, execute,
    reporter::ReporterBuilder,
    settings::TEST_ROOT_ENV,
    signal::SignalHandlerKind,
};
use igt_runnercomms::{DumpStatus, PacketHeader, PacketView, RunnerExitCode, read_dump};
use std::{
    ffi::OsString,
    io::Write,
    ops::ControlFlow,
};
use tracing::{debug, info, warn};

/// Runs IGT test binaries and records their results.
///
/// With one path, it is the results directory and the test root comes from IGT_TEST_ROOT. With
/// two, they are the test root and the results directory.
#[derive(Debug, Parser)]
#[command(name = "igt_runner", version)]
pub struct RunnerApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(flatten)]
    runner: RunnerOpts,
}

impl RunnerApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        self.exec_with(output, output_writer, SignalHandlerKind::Standard)
    }

    fn exec_with(
        self,
        output: OutputContext,
        output_writer: &mut OutputWriter,
        signal_handler: SignalHandlerKind,
    ) -> Result<i32> {
        if self.runner.ignore_missing {
            debug!("--ignore-missing is accepted for compatibility and has no effect");
        }
        let settings = Settings::from_options(self.runner.into_options(env_test_root()))?;
        let job_list = JobList::build(&settings)?;

        if settings.dry_run {
            write_dry_run(&job_list, output_writer)?;
            return Ok(RunnerExitCode::OK);
        }

        let mut state = ExecuteState::initialize(&settings, &job_list)?;
        run_to_completion(
            &mut state,
            &settings,
            job_list,
            output,
            output_writer,
            signal_handler,
        )
    }
}

/// Parses `igt_runner` arguments (including the program name) into settings options.
///
/// `IGT_TEST_ROOT` is read from the environment.
pub fn parse_settings<I, T>(args: I) -> Result<SettingsOptions, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let app = RunnerApp::try_parse_from(args)?;
    Ok(app.runner.into_options(env_test_root()))
}

fn env_test_root() -> Option<Utf8PathBuf> {
    let value = std::env::var_os(TEST_ROOT_ENV)?;
    match Utf8PathBuf::try_from(std::path::PathBuf::from(value)) {
        Ok(path) => Some(path),
        Err(error) => {
            warn!("ignoring {TEST_ROOT_ENV}: {error}");
            None
        }
    }
}

#[derive(Debug, Args)]
struct RunnerOpts {
    /// [TEST_ROOT] RESULTS_PATH
    #[arg(value_name = "PATH", num_args = 1..=2, required = true)]
    paths: Vec<Utf8PathBuf>,

    /// Name of this run [default: last component of the results path]
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Run the subtests listed in FILE, in order, instead of the test root's catalogue
    #[arg(long, value_name = "FILE")]
    test_list: Option<Utf8PathBuf>,

    /// Accepted for compatibility; has no effect
    #[arg(long)]
    ignore_missing: bool,

    /// Print the job list and exit without running anything
    #[arg(short = 'd', long)]
    dry_run: bool,

    /// Only run tests whose name matches REGEX (may be repeated)
    #[arg(
        short = 't',
        long = "include-tests",
        visible_alias = "include",
        value_name = "REGEX"
    )]
    include: Vec<String>,

    /// Skip tests whose name matches REGEX (may be repeated)
    #[arg(
        short = 'x',
        long = "exclude-tests",
        visible_alias = "exclude",
        value_name = "REGEX"
    )]
    exclude: Vec<String>,

    /// Sync results to disk after every write
    #[arg(short = 's', long)]
    sync: bool,

    /// Run as many subtests of a binary as possible in one process
    #[arg(short = 'm', long)]
    multiple_mode: bool,

    /// How much progress to print
    #[arg(short = 'l', long, value_enum, default_value_t, value_name = "LEVEL")]
    log_level: LogLevelOpt,

    /// Replace the results of an earlier run in the results path
    #[arg(short = 'o', long)]
    overwrite: bool,

    /// Kill a test after this many seconds without output (0 disables)
    #[arg(long, value_name = "SECONDS", default_value_t = 0)]
    inactivity_timeout: u64,

    /// Do not start new tests after this many seconds (0 disables)
    #[arg(long, value_name = "SECONDS", default_value_t = 0)]
    overall_timeout: u64,

    /// Arm the hardware watchdogs while tests run
    #[arg(long)]
    use_watchdog: bool,

    /// Stop the run when a subtest fails
    #[arg(long = "abort-on-monitored-error")]
    abort_on_error: bool,

    /// Record that dmesg warnings should be classified the way piglit does
    #[arg(long)]
    piglit_style_dmesg: bool,
}

impl RunnerOpts {
    fn into_options(self, env_test_root: Option<Utf8PathBuf>) -> SettingsOptions {
        let mut paths = self.paths.into_iter();
        let (test_root, results_path) = match (paths.next(), paths.next()) {
            (Some(test_root), Some(results_path)) => (Some(test_root), results_path),
            (Some(results_path), None) => (None, results_path),
            // clap requires at least one path.
            (None, _) => (None, Utf8PathBuf::new()),
        };

        SettingsOptions {
            test_root,
            env_test_root,
            results_path,
            name: self.name,
            test_list: self.test_list,
            include: self.include,
            exclude: self.exclude,
            dry_run: self.dry_run,
            sync: self.sync,
            multiple_mode: self.multiple_mode,
            log_level: self.log_level.into(),
            overwrite: self.overwrite,
            inactivity_timeout: self.inactivity_timeout,
            overall_timeout: self.overall_timeout,
            use_watchdog: self.use_watchdog,
            abort_on_error: self.abort_on_error,
            piglit_style_dmesg: self.piglit_style_dmesg,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
enum LogLevelOpt {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl From<LogLevelOpt> for LogLevel {
    fn from(opt: LogLevelOpt) -> Self {
        match opt {
            LogLevelOpt::Quiet => LogLevel::Quiet,
            LogLevelOpt::Normal => LogLevel::Normal,
            LogLevelOpt::Verbose => LogLevel::Verbose,
        }
    }
}

/// Continues an interrupted igt_runner run.
#[derive(Debug, Parser)]
#[command(name = "igt_resume", version)]
pub struct ResumeApp {
    #[command(flatten)]
    output: OutputOpts,

    /// Results directory of the run to continue
    #[arg(value_name = "RESULTS_PATH")]
    results_path: Utf8PathBuf,
}

impl ResumeApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        self.exec_with(output, output_writer, SignalHandlerKind::Standard)
    }

    fn exec_with(
        self,
        output: OutputContext,
        output_writer: &mut OutputWriter,
        signal_handler: SignalHandlerKind,
    ) -> Result<i32> {
        let (mut state, settings, job_list) = ExecuteState::from_resume(&self.results_path)
            .map_err(|err| ExpectedError::resume(&self.results_path, err))?;
        info!(
            "resuming {} at job {} of {}",
            settings.name,
            state.next() + 1,
            job_list.len()
        );
        run_to_completion(
            &mut state,
            &settings,
            job_list,
            output,
            output_writer,
            signal_handler,
        )
    }
}

/// Prints a comms dump in human-readable form, one packet per line.
#[derive(Debug, Parser)]
#[command(name = "igt_comms_decoder", version)]
pub struct DecoderApp {
    #[command(flatten)]
    output: OutputOpts,

    /// The `comms` file to decode
    #[arg(value_name = "FILE")]
    path: Utf8PathBuf,
}

impl DecoderApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    pub fn exec(self, output_writer: &mut OutputWriter) -> Result<i32> {
        let data = std::fs::read(&self.path).map_err(|err| ExpectedError::DumpFileRead {
            path: self.path.clone(),
            err,
        })?;

        let mut writer = output_writer.stdout_writer();
        let mut write_error = None;
        let res = read_dump(
            &data,
            &mut |header: &PacketHeader, view: PacketView<'_>| match writeln!(
                writer,
                "{}",
                view.display(header)
            ) {
                Ok(()) => ControlFlow::Continue(()),
                Err(err) => {
                    write_error = Some(err);
                    ControlFlow::Break(())
                }
            },
        );
        if let Some(err) = write_error {
            return Err(ExpectedError::WriteOutput { err });
        }
        writer
            .flush()
            .map_err(|err| ExpectedError::WriteOutput { err })?;

        let status = res.map_err(|err| ExpectedError::DumpDecode {
            path: self.path.clone(),
            err,
        })?;
        if status == DumpStatus::Empty {
            info!("`{}` holds no packets from the test itself", self.path);
        }
        Ok(RunnerExitCode::OK)
    }
}

fn write_dry_run(job_list: &JobList, output_writer: &mut OutputWriter) -> Result<()> {
    let mut writer = output_writer.stdout_writer();
    let res = job_list
        .entries
        .iter()
        .try_for_each(|entry| writeln!(writer, "{entry}"))
        .and_then(|()| writer.flush());
    res.map_err(|err| ExpectedError::WriteOutput { err })
}

fn run_to_completion(
    state: &mut ExecuteState,
    settings: &Settings,
    mut job_list: JobList,
    output: OutputContext,
    output_writer: &mut OutputWriter,
    signal_handler: SignalHandlerKind,
) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| ExpectedError::RuntimeBuild { err })?;

    let mut reporter = ReporterBuilder::default()
        .set_colorize(output.should_colorize_reporter())
        .set_log_level(settings.log_level)
        .build(output_writer.reporter_output());

    let outcome = runtime.block_on(execute(
        state,
        settings,
        &mut job_list,
        signal_handler,
        &mut reporter,
    ))?;
    Ok(outcome_exit_code(&outcome))
}

fn outcome_exit_code(outcome: &ExecuteOutcome) -> i32 {
    match outcome {
        ExecuteOutcome::Completed => RunnerExitCode::OK,
        ExecuteOutcome::Aborted { .. }
        | ExecuteOutcome::Interrupted { .. }
        | ExecuteOutcome::OverallTimeout { .. } => RunnerExitCode::ABORTED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Color;
    use camino::Utf8Path;
    use camino_tempfile::{Utf8TempDir, tempdir};
    use pretty_assertions::assert_eq;
    use std::{fs, os::unix::fs::PermissionsExt};
    use test_case::test_case;

    fn write_script(dir: &Utf8Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn test_root() -> Utf8TempDir {
        let dir = tempdir().unwrap();
        write_script(
            dir.path(),
            "successtest",
            indoc::indoc! {r#"
                if [ "$1" = "--list-subtests" ]; then
                    echo first-subtest
                    echo second-subtest
                    exit 0
                fi
                echo "Starting subtest: first-subtest"
                echo "Subtest first-subtest: SUCCESS (0.000s)"
            "#},
        );
        write_script(
            dir.path(),
            "no-subtests",
            "[ \"$1\" = \"--list-subtests\" ] && exit 79\nexit 0",
        );
        fs::write(
            dir.path().join("test-list.txt"),
            "TESTLIST\nsuccesstest no-subtests\nEND TESTLIST\n",
        )
        .unwrap();
        dir
    }

    fn is_results_dir(path: &Utf8Path) -> bool {
        path.join(igt_runner::settings::METADATA_FILE_NAME).is_file()
            && path.join(igt_runner::job_list::JOB_LIST_FILE_NAME).is_file()
    }

    fn output_context() -> OutputContext {
        OutputContext {
            color: Color::Never,
        }
    }

    fn test_writer() -> OutputWriter {
        OutputWriter::Test {
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    fn parse(args: &[&str]) -> SettingsOptions {
        let args = std::iter::once("igt_runner").chain(args.iter().copied());
        let app = RunnerApp::try_parse_from(args).unwrap();
        app.runner.into_options(None)
    }

    #[test]
    fn positional_paths() {
        let options = parse(&["/results"]);
        assert_eq!(options.test_root, None);
        assert_eq!(options.results_path, "/results");

        let options = parse(&["/tests", "/results"]);
        assert_eq!(options.test_root.as_deref(), Some(Utf8Path::new("/tests")));
        assert_eq!(options.results_path, "/results");
    }

    #[test_case(&[] ; "no paths")]
    #[test_case(&["/a", "/b", "/c"] ; "too many paths")]
    #[test_case(&["--no-such-flag", "/results"] ; "unknown flag")]
    #[test_case(&["-l", "loud", "/results"] ; "bad log level")]
    fn parse_errors(args: &[&str]) {
        let res =
            RunnerApp::try_parse_from(std::iter::once("igt_runner").chain(args.iter().copied()));
        assert!(res.is_err(), "{args:?} should fail to parse");
    }

    #[test]
    fn every_flag() {
        let options = parse(&[
            "-n",
            "run-name",
            "--test-list",
            "/list.txt",
            "--ignore-missing",
            "-d",
            "-t",
            "first",
            "--include",
            "second",
            "-x",
            "third",
            "--exclude-tests",
            "fourth",
            "-s",
            "-m",
            "-l",
            "verbose",
            "-o",
            "--inactivity-timeout",
            "30",
            "--overall-timeout",
            "600",
            "--use-watchdog",
            "--abort-on-monitored-error",
            "--piglit-style-dmesg",
            "/tests",
            "/results",
        ]);
        assert_eq!(options.name.as_deref(), Some("run-name"));
        assert_eq!(options.test_list.as_deref(), Some(Utf8Path::new("/list.txt")));
        assert!(options.dry_run);
        assert_eq!(options.include, ["first", "second"]);
        assert_eq!(options.exclude, ["third", "fourth"]);
        assert!(options.sync);
        assert!(options.multiple_mode);
        assert_eq!(options.log_level, LogLevel::Verbose);
        assert!(options.overwrite);
        assert_eq!(options.inactivity_timeout, 30);
        assert_eq!(options.overall_timeout, 600);
        assert!(options.use_watchdog);
        assert!(options.abort_on_error);
        assert!(options.piglit_style_dmesg);
    }

    #[test]
    fn parse_builds_fresh_options() {
        let first = parse_settings(["igt_runner", "-t", "first", "-s", "/results"]).unwrap();
        let second = parse_settings(["igt_runner", "/results"]).unwrap();
        assert_eq!(first.include, ["first"]);
        assert!(second.include.is_empty());
        assert!(!second.sync);
    }

    #[test]
    fn dry_run_prints_jobs() {
        let root = test_root();
        let results = root.path().join("results");
        let app =
            RunnerApp::try_parse_from(["igt_runner", "-d", root.path().as_str(), results.as_str()])
                .unwrap();
        let mut writer = test_writer();
        let code = app
            .exec_with(output_context(), &mut writer, SignalHandlerKind::Noop)
            .unwrap();
        assert_eq!(code, RunnerExitCode::OK);

        let OutputWriter::Test { stdout, .. } = writer else {
            unreachable!()
        };
        assert_eq!(
            String::from_utf8(stdout).unwrap(),
            "successtest (first-subtest)\nsuccesstest (second-subtest)\nno-subtests\n"
        );
        assert!(!results.exists());
    }

    #[test]
    fn run_resume_and_decode() {
        let root = test_root();
        let results = root.path().join("results");
        let app = RunnerApp::try_parse_from([
            "igt_runner",
            "-m",
            root.path().as_str(),
            results.as_str(),
        ])
        .unwrap();
        let mut writer = test_writer();
        let code = app
            .exec_with(output_context(), &mut writer, SignalHandlerKind::Noop)
            .unwrap();
        assert_eq!(code, RunnerExitCode::OK);
        assert!(is_results_dir(&results));

        let OutputWriter::Test { stderr, .. } = writer else {
            unreachable!()
        };
        assert_eq!(
            String::from_utf8(stderr).unwrap(),
            "[1/2] successtest\n[2/2] no-subtests\n"
        );

        // Everything ran, so resuming runs nothing more.
        let app = ResumeApp::try_parse_from(["igt_resume", results.as_str()]).unwrap();
        let mut writer = test_writer();
        let code = app
            .exec_with(output_context(), &mut writer, SignalHandlerKind::Noop)
            .unwrap();
        assert_eq!(code, RunnerExitCode::OK);

        let comms = results.join("0").join("comms");
        let app = DecoderApp::try_parse_from(["igt_comms_decoder", comms.as_str()]).unwrap();
        let mut writer = test_writer();
        assert_eq!(app.exec(&mut writer).unwrap(), RunnerExitCode::OK);
        let OutputWriter::Test { stdout, .. } = writer else {
            unreachable!()
        };
        let stdout = String::from_utf8(stdout).unwrap();
        let lines: Vec<_> = stdout.lines().collect();
        assert_eq!(lines.len(), 2, "decoded: {stdout}");
        assert!(
            lines[0].ends_with(&format!(
                "EXEC\tcmdline={}/successtest",
                root.path().canonicalize_utf8().unwrap()
            )),
            "decoded: {stdout}"
        );
        assert!(lines[1].contains("EXIT\texitcode=0,timeused="), "decoded: {stdout}");
    }

    #[test]
    fn existing_results_fail_setup() {
        let root = test_root();
        let results = root.path().join("results");
        let args = ["igt_runner", root.path().as_str(), results.as_str()];
        RunnerApp::try_parse_from(args)
            .unwrap()
            .exec_with(output_context(), &mut test_writer(), SignalHandlerKind::Noop)
            .unwrap();

        let err = RunnerApp::try_parse_from(args)
            .unwrap()
            .exec_with(output_context(), &mut test_writer(), SignalHandlerKind::Noop)
            .unwrap_err();
        assert_eq!(err.process_exit_code(), RunnerExitCode::SETUP_ERROR);
    }

    #[test]
    fn decode_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("comms");
        let app = DecoderApp::try_parse_from(["igt_comms_decoder", path.as_str()]).unwrap();
        let err = app.exec(&mut test_writer()).unwrap_err();
        assert_eq!(err.process_exit_code(), RunnerExitCode::EXECUTION_FAILED);
    }

    #[test]
    fn outcome_codes() {
        assert_eq!(
            outcome_exit_code(&ExecuteOutcome::Completed),
            RunnerExitCode::OK
        );
        assert_eq!(
            outcome_exit_code(&ExecuteOutcome::Interrupted {
                event: igt_runner::signal::ShutdownEvent::Interrupt
            }),
            RunnerExitCode::ABORTED
        );
    }
}
