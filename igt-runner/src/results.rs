// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracking subtest results as a job runs.
//!
//! The tracker consumes decoded runner packets (or, for children that do not use the comms
//! socket, the equivalent stdout lines) and decides which subtest names go into the journal.

use igt_runnercomms::PacketView;
use std::fmt;
use tracing::warn;

/// The result of a subtest or dynamic subtest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestResult {
    /// The subtest passed.
    Success,
    /// The subtest was skipped.
    Skip,
    /// The subtest failed.
    Fail,
    /// The child went away before reporting a result.
    Incomplete,
    /// The runner killed the child while the subtest was running.
    Timeout,
    /// Any other result text, typically from a result override.
    Other(String),
}

impl TestResult {
    /// Parses result text as sent by a test binary.
    pub fn parse(text: &str) -> Self {
        match text {
            "SUCCESS" | "pass" => Self::Success,
            "SKIP" | "skip" => Self::Skip,
            "FAIL" | "fail" => Self::Fail,
            "incomplete" => Self::Incomplete,
            "timeout" => Self::Timeout,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Returns the result text.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "SUCCESS",
            Self::Skip => "SKIP",
            Self::Fail => "FAIL",
            Self::Incomplete => "incomplete",
            Self::Timeout => "timeout",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A result recorded for one (dynamic) subtest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrackedResult {
    /// The subtest name, or `subtest@dynamic` for dynamic subtests.
    pub name: String,
    /// The result.
    pub result: TestResult,
    /// Time used in seconds, as reported by the child.
    pub time_used: Option<String>,
    /// The reason given for a skip or failure.
    pub reason: Option<String>,
}

#[derive(Clone, Debug)]
struct OpenBlock {
    name: String,
    dynamic: bool,
}

/// Collects results for one job.
#[derive(Clone, Debug, Default)]
pub struct ResultTracker {
    results: Vec<TrackedResult>,
    open: Vec<OpenBlock>,
    last_closed: Option<usize>,
    version: Option<String>,
    saw_packets: bool,
}

impl ResultTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the results recorded so far, in completion order.
    pub fn results(&self) -> &[TrackedResult] {
        &self.results
    }

    /// Returns the version string the child reported, if any.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Returns true if any recorded result is a failure, including blocks the child never
    /// finished.
    pub fn has_failure(&self) -> bool {
        self.results.iter().any(|r| {
            matches!(
                r.result,
                TestResult::Fail | TestResult::Incomplete | TestResult::Timeout
            )
        })
    }

    /// Returns true once a packet has been observed.
    pub fn uses_comms(&self) -> bool {
        self.saw_packets
    }

    /// Returns the innermost block without a result, if any.
    pub fn open_subtest(&self) -> Option<&str> {
        self.open.last().map(|block| block.name.as_str())
    }

    /// Observes a decoded packet. Returns a subtest name to append to the journal, if any.
    pub fn observe_packet(&mut self, view: &PacketView<'_>) -> Option<String> {
        self.saw_packets = true;
        match view {
            PacketView::SubtestStart { name } => {
                self.start(name, false);
                Some((*name).to_owned())
            }
            PacketView::SubtestResult(result) => {
                let started = self.finish(
                    result.name,
                    false,
                    TestResult::parse(result.result),
                    result.time_used,
                    result.reason,
                );
                (!started).then(|| result.name.to_owned())
            }
            PacketView::DynamicSubtestStart { name } => {
                self.start(name, true);
                None
            }
            PacketView::DynamicSubtestResult(result) => {
                self.finish(
                    result.name,
                    true,
                    TestResult::parse(result.result),
                    result.time_used,
                    result.reason,
                );
                None
            }
            PacketView::VersionString { text } => {
                self.version = Some((*text).to_owned());
                None
            }
            PacketView::ResultOverride { result } => {
                self.apply_override(result);
                None
            }
            PacketView::Log { .. } | PacketView::Exec { .. } | PacketView::Exit { .. } => None,
            PacketView::Invalid => None,
        }
    }

    /// Observes one line of the child's stdout.
    ///
    /// Only used while no packets have been seen: a child connected to the runner reports
    /// through the socket instead.
    pub fn observe_stdout_line(&mut self, line: &str) -> Option<String> {
        if self.saw_packets {
            return None;
        }

        if let Some(name) = line.strip_prefix("Starting subtest: ") {
            let name = name.trim_end();
            self.start(name, false);
            return Some(name.to_owned());
        }
        if let Some(name) = line.strip_prefix("Starting dynamic subtest: ") {
            self.start(name.trim_end(), true);
            return None;
        }
        if let Some(rest) = line.strip_prefix("Subtest ") {
            let (name, result, time_used) = parse_result_line(rest)?;
            let started = self.finish(name, false, result, time_used, None);
            return (!started).then(|| name.to_owned());
        }
        if let Some(rest) = line.strip_prefix("Dynamic subtest ") {
            let (name, result, time_used) = parse_result_line(rest)?;
            self.finish(name, true, result, time_used, None);
        }
        None
    }

    /// Records every block still open with `result`. Called when the child has gone away.
    pub fn close_open(&mut self, result: TestResult) {
        while let Some(block) = self.open.pop() {
            let name = self.qualified_name(&block.name, block.dynamic);
            self.push_result(TrackedResult {
                name,
                result: result.clone(),
                time_used: None,
                reason: None,
            });
        }
    }

    fn start(&mut self, name: &str, dynamic: bool) {
        self.open.push(OpenBlock {
            name: name.to_owned(),
            dynamic,
        });
    }

    /// Closes a block. Returns true if a matching start was seen.
    fn finish(
        &mut self,
        name: &str,
        dynamic: bool,
        result: TestResult,
        time_used: Option<&str>,
        reason: Option<&str>,
    ) -> bool {
        let position = self
            .open
            .iter()
            .rposition(|block| block.name == name && block.dynamic == dynamic);
        let started = match position {
            Some(position) => {
                // Anything opened after the matching block never reported a result.
                for block in self.open.drain(position + 1..) {
                    warn!("`{}` closed without a result", block.name);
                }
                self.open.truncate(position);
                true
            }
            None => false,
        };

        let name = self.qualified_name(name, dynamic);
        self.push_result(TrackedResult {
            name,
            result,
            time_used: time_used.map(str::to_owned),
            reason: reason.filter(|r| !r.is_empty()).map(str::to_owned),
        });
        started
    }

    fn qualified_name(&self, name: &str, dynamic: bool) -> String {
        let parent = dynamic
            .then(|| self.open.iter().rev().find(|block| !block.dynamic))
            .flatten();
        match parent {
            Some(parent) => format!("{}@{name}", parent.name),
            None => name.to_owned(),
        }
    }

    fn push_result(&mut self, result: TrackedResult) {
        self.last_closed = Some(self.results.len());
        self.results.push(result);
    }

    fn apply_override(&mut self, result: &str) {
        if let Some(open) = self.open.last() {
            warn!(
                "result override `{result}` received while `{}` is still running, \
                 applying it to the most recently finished subtest",
                open.name
            );
        }
        match self.last_closed {
            Some(index) => self.results[index].result = TestResult::parse(result),
            None => warn!("result override `{result}` received before any result, ignoring"),
        }
    }
}

/// Parses `<name>: <RESULT> (<time>s)` with the time optional.
fn parse_result_line(rest: &str) -> Option<(&str, TestResult, Option<&str>)> {
    let (name, rest) = rest.rsplit_once(": ")?;
    let mut parts = rest.trim_end().splitn(2, ' ');
    let result = TestResult::parse(parts.next()?);
    let time_used = parts
        .next()
        .and_then(|time| time.strip_prefix('(')?.strip_suffix("s)"));
    Some((name, result, time_used))
}
