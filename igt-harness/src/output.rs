// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Where harness events go: a runner socket, or plain text on stdout and stderr.

use igt_runnercomms::{RUNNER_SOCKET_ENV, RunnerPacket};
use std::{
    io::{self, Write},
    os::unix::net::UnixStream,
    time::Duration,
};

/// The result of a reported block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubtestOutcome {
    /// The block completed.
    Success,
    /// The block skipped, with a reason.
    Skip(String),
    /// The block failed, with a reason.
    Fail(String),
}

impl SubtestOutcome {
    /// Returns the result as it appears on the wire and in output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Skip(_) => "SKIP",
            Self::Fail(_) => "FAIL",
        }
    }

    /// Returns the reason, or an empty string for successes.
    pub fn reason(&self) -> &str {
        match self {
            Self::Success => "",
            Self::Skip(reason) | Self::Fail(reason) => reason,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ReportedKind {
    Subtest,
    Dynamic,
}

impl ReportedKind {
    fn label(self) -> (&'static str, &'static str) {
        match self {
            Self::Subtest => ("Starting subtest", "Subtest"),
            Self::Dynamic => ("Starting dynamic subtest", "Dynamic subtest"),
        }
    }
}

const STDOUT: u8 = 1;
const STDERR: u8 = 2;

/// The destination for everything the harness reports.
#[derive(Debug)]
pub(crate) enum HarnessOutput {
    /// Packets over the socket inherited from the runner.
    Runner(UnixStream),
    /// Human-readable lines on stdout and stderr.
    Terminal,
    /// Human-readable lines collected in memory.
    Buffer(Vec<String>),
}

impl HarnessOutput {
    /// Connects to the runner socket named by the environment, falling back to the terminal.
    pub(crate) fn from_env() -> Self {
        match connect_runner() {
            Some(stream) => {
                tracing::debug!("connected to runner socket");
                Self::Runner(stream)
            }
            None => Self::Terminal,
        }
    }

    pub(crate) fn is_runner(&self) -> bool {
        matches!(self, Self::Runner(_))
    }

    pub(crate) fn lines(&self) -> Option<&[String]> {
        match self {
            Self::Buffer(lines) => Some(lines),
            Self::Runner(_) | Self::Terminal => None,
        }
    }

    pub(crate) fn info(&mut self, text: &str) {
        self.emit(STDOUT, text, || RunnerPacket::log(STDOUT, &with_newline(text)));
    }

    pub(crate) fn error(&mut self, text: &str) {
        self.emit(STDERR, text, || RunnerPacket::log(STDERR, &with_newline(text)));
    }

    pub(crate) fn version(&mut self, text: &str) {
        self.emit(STDOUT, text, || RunnerPacket::versionstring(text));
    }

    pub(crate) fn started(&mut self, kind: ReportedKind, name: &str) {
        let (starting, _) = kind.label();
        let line = format!("{starting}: {name}");
        self.emit(STDOUT, &line, || match kind {
            ReportedKind::Subtest => RunnerPacket::subtest_start(name),
            ReportedKind::Dynamic => RunnerPacket::dynamic_subtest_start(name),
        });
    }

    pub(crate) fn finished(
        &mut self,
        kind: ReportedKind,
        name: &str,
        outcome: &SubtestOutcome,
        elapsed: Duration,
    ) {
        let (_, finished) = kind.label();
        let time_used = format!("{:.3}", elapsed.as_secs_f64());

        match outcome {
            SubtestOutcome::Success => {}
            SubtestOutcome::Skip(reason) if !self.is_runner() => {
                self.info(&format!("Test requirement not met: {reason}"));
            }
            SubtestOutcome::Fail(reason) if !self.is_runner() => {
                self.error(&format!("{finished} {name} failed: {reason}"));
            }
            SubtestOutcome::Skip(_) | SubtestOutcome::Fail(_) => {}
        }

        let line = format!("{finished} {name}: {} ({time_used}s)", outcome.as_str());
        self.emit(STDOUT, &line, || match kind {
            ReportedKind::Subtest => {
                RunnerPacket::subtest_result(name, outcome.as_str(), &time_used, outcome.reason())
            }
            ReportedKind::Dynamic => RunnerPacket::dynamic_subtest_result(
                name,
                outcome.as_str(),
                &time_used,
                outcome.reason(),
            ),
        });
    }

    pub(crate) fn result_override(&mut self, result: &str) {
        let line = format!("Result overridden: {result}");
        self.emit(STDOUT, &line, || RunnerPacket::result_override(result));
    }

    fn emit(&mut self, stream: u8, line: &str, packet: impl FnOnce() -> RunnerPacket) {
        match self {
            Self::Runner(socket) => {
                if let Err(error) = socket.write_all(packet().as_bytes()) {
                    // The runner went away: keep the information on the terminal instead.
                    tracing::debug!(%error, "lost runner socket, writing to the terminal");
                    *self = Self::Terminal;
                    write_line(stream, line);
                }
            }
            Self::Terminal => write_line(stream, line),
            Self::Buffer(lines) => lines.push(line.to_owned()),
        }
    }
}

fn write_line(stream: u8, line: &str) {
    // Output errors (e.g. a closed pipe) must not change test results.
    let _ = if stream == STDERR {
        writeln!(io::stderr().lock(), "{line}")
    } else {
        writeln!(io::stdout().lock(), "{line}")
    };
}

fn with_newline(text: &str) -> String {
    let mut text = text.to_owned();
    text.push('\n');
    text
}

#[cfg(unix)]
fn connect_runner() -> Option<UnixStream> {
    use std::os::fd::{FromRawFd, RawFd};

    let fd: RawFd = std::env::var(RUNNER_SOCKET_ENV).ok()?.parse().ok()?;
    if fd < 0 {
        return None;
    }

    let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
    // SAFETY: fstat writes into the provided buffer and does not retain it.
    if unsafe { libc::fstat(fd, stat.as_mut_ptr()) } != 0 {
        return None;
    }
    // SAFETY: fstat succeeded, so the buffer is initialized.
    let stat = unsafe { stat.assume_init() };
    if stat.st_mode & libc::S_IFMT != libc::S_IFSOCK {
        return None;
    }

    // SAFETY: the fd is an open socket handed to this process by the runner, and nothing else in
    // the process takes ownership of it.
    Some(unsafe { UnixStream::from_raw_fd(fd) })
}
