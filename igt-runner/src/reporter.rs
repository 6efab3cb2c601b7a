// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints progress while jobs execute.
//!
//! The main structure in this module is [`ExecuteReporter`].

use crate::{
    execute::{ExecuteOutcome, KillSignal},
    helpers::{plural, usize_decimal_char_width},
    job_list::JobListEntry,
    results::{TestResult, TrackedResult},
    settings::LogLevel,
    signal::ShutdownEvent,
    time::StopwatchSnapshot,
};
use camino::Utf8Path;
use owo_colors::{OwoColorize, Style};
use std::io::{self, Write};

/// Standard error destination for the reporter.
///
/// This is usually a terminal, but can be an in-memory buffer for tests.
pub enum ReporterStderr<'a> {
    /// Produce output on the (possibly piped) terminal.
    Terminal,

    /// Write output to a buffer.
    Buffer(&'a mut Vec<u8>),
}

/// Execute reporter builder.
#[derive(Debug, Default)]
pub struct ReporterBuilder {
    should_colorize: bool,
    log_level: LogLevel,
}

impl ReporterBuilder {
    /// Set to true if the reporter should colorize output.
    pub fn set_colorize(&mut self, should_colorize: bool) -> &mut Self {
        self.should_colorize = should_colorize;
        self
    }

    /// Sets how much to print.
    pub fn set_log_level(&mut self, log_level: LogLevel) -> &mut Self {
        self.log_level = log_level;
        self
    }

    /// Creates a new reporter.
    pub fn build<'a>(&self, output: ReporterStderr<'a>) -> ExecuteReporter<'a> {
        let mut styles = Styles::default();
        if self.should_colorize {
            styles.colorize();
        }
        ExecuteReporter {
            output,
            styles,
            log_level: self.log_level,
        }
    }
}

#[derive(Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    warn: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.warn = Style::new().magenta().bold();
    }

    fn result_style(&self, result: &TestResult) -> Style {
        match result {
            TestResult::Success => self.pass,
            TestResult::Skip => self.skip,
            TestResult::Fail | TestResult::Incomplete | TestResult::Timeout => self.fail,
            TestResult::Other(_) => self.warn,
        }
    }
}

/// Reports execution progress to standard error.
pub struct ExecuteReporter<'a> {
    output: ReporterStderr<'a>,
    styles: Styles,
    log_level: LogLevel,
}

impl<'a> ExecuteReporter<'a> {
    fn write_line(&mut self, level: LogLevel, line: std::fmt::Arguments<'_>) -> io::Result<()> {
        if self.log_level < level {
            return Ok(());
        }
        match &mut self.output {
            ReporterStderr::Terminal => {
                let mut stderr = io::stderr().lock();
                writeln!(stderr, "{line}")?;
                stderr.flush()
            }
            ReporterStderr::Buffer(buf) => writeln!(buf, "{line}"),
        }
    }

    pub(crate) fn watchdogs_opened(&mut self, paths: &[&Utf8Path]) -> io::Result<()> {
        self.write_line(
            LogLevel::Verbose,
            format_args!(
                "Initializing watchdogs ({} {})",
                paths.len(),
                plural::devices_str(paths.len())
            ),
        )?;
        for path in paths {
            self.write_line(LogLevel::Verbose, format_args!(" {path}"))?;
        }
        Ok(())
    }

    pub(crate) fn watchdog_timeout_shortened(
        &mut self,
        accepted: i32,
        intervals: u64,
        interval_secs: u64,
    ) -> io::Result<()> {
        self.write_line(
            LogLevel::Verbose,
            format_args!(
                "Watchdog doesn't support the timeout we requested (shortened to {accepted} seconds).\n\
                 Using {intervals} intervals of {interval_secs} seconds."
            ),
        )
    }

    pub(crate) fn watchdogs_closed(&mut self) -> io::Result<()> {
        self.write_line(LogLevel::Verbose, format_args!("Closing watchdogs"))
    }

    /// Prints `[NNN/NNN] binary (sel1, sel2)`.
    pub(crate) fn job_started(
        &mut self,
        index: usize,
        total: usize,
        entry: &JobListEntry,
    ) -> io::Result<()> {
        let width = usize_decimal_char_width(total);
        let current = format!("{:0width$}", index + 1);
        let total = format!("{total:0width$}");
        let count_style = self.styles.count;
        self.write_line(
            LogLevel::Normal,
            format_args!(
                "[{}/{}] {entry}",
                current.style(count_style),
                total.style(count_style),
            ),
        )
    }

    pub(crate) fn subtest_started(&mut self, name: &str) -> io::Result<()> {
        self.write_line(LogLevel::Verbose, format_args!("Starting subtest: {name}"))
    }

    pub(crate) fn subtest_finished(&mut self, result: &TrackedResult) -> io::Result<()> {
        let style = self.styles.result_style(&result.result);
        let time = result.time_used.as_deref().unwrap_or("?");
        match &result.reason {
            Some(reason) => self.write_line(
                LogLevel::Verbose,
                format_args!(
                    "Subtest {}: {} ({time}s): {reason}",
                    result.name,
                    result.result.style(style)
                ),
            ),
            None => self.write_line(
                LogLevel::Verbose,
                format_args!(
                    "Subtest {}: {} ({time}s)",
                    result.name,
                    result.result.style(style)
                ),
            ),
        }
    }

    pub(crate) fn timeout_kill(&mut self, signal: KillSignal) -> io::Result<()> {
        self.write_line(
            LogLevel::Normal,
            format_args!("Timeout. Killing the current test with {signal}."),
        )
    }

    pub(crate) fn child_refuses_to_die(&mut self) -> io::Result<()> {
        let style = self.styles.fail;
        self.write_line(
            LogLevel::Quiet,
            format_args!("{}", "Child refuses to die. Aborting.".style(style)),
        )
    }

    pub(crate) fn abort_requested(&mut self, event: ShutdownEvent) -> io::Result<()> {
        self.write_line(
            LogLevel::Normal,
            format_args!("Abort requested ({event}), terminating children"),
        )
    }

    pub(crate) fn spawn_failed(&mut self, program: &Utf8Path, error: &io::Error) -> io::Result<()> {
        let style = self.styles.fail;
        self.write_line(
            LogLevel::Normal,
            format_args!("{} {program}: {error}", "Cannot execute".style(style)),
        )
    }

    pub(crate) fn run_finished(
        &mut self,
        outcome: &ExecuteOutcome,
        executed: usize,
        snapshot: &StopwatchSnapshot,
    ) -> io::Result<()> {
        let warn = self.styles.warn;
        let jobs = plural::jobs_str(executed);
        match outcome {
            ExecuteOutcome::Completed => {}
            ExecuteOutcome::Aborted { index, reason } => self.write_line(
                LogLevel::Normal,
                format_args!(
                    "{} after job {}: {reason}",
                    "Aborting".style(warn),
                    index + 1
                ),
            )?,
            ExecuteOutcome::Interrupted { event } => self.write_line(
                LogLevel::Normal,
                format_args!("{} by {event}", "Interrupted".style(warn)),
            )?,
            ExecuteOutcome::OverallTimeout { limit } => self.write_line(
                LogLevel::Normal,
                format_args!(
                    "{} of {}s exceeded, not starting further jobs",
                    "Overall timeout".style(warn),
                    limit.as_secs()
                ),
            )?,
        }
        self.write_line(
            LogLevel::Verbose,
            format_args!(
                "Executed {executed} {jobs} between {} and {} ({:.3}s)",
                snapshot.start_time.format("%Y-%m-%d %H:%M:%S"),
                snapshot.end_time().format("%H:%M:%S"),
                snapshot.duration.as_secs_f64()
            ),
        )
    }
}
