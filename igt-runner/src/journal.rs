// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-job journal and its replay.
//!
//! A journal is append-only. Each line is either the name of a subtest, written when the subtest
//! starts, or a terminating `exit:<code> (<secs>s)` or `timeout:<code> (<secs>s)` line written by
//! the runner when the child goes away. Replaying a journal tells a resumed run whether the job
//! finished and, if not, which subtests must not be attempted again.

use std::{fmt, time::Duration};

/// The name of the journal file in a job's result directory.
pub const JOURNAL_FILE_NAME: &str = "journal.txt";

/// One line of a journal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JournalLine<'a> {
    /// A subtest that was started.
    Subtest(&'a str),

    /// The child exited on its own.
    Exit {
        /// The mapped exit code.
        code: i32,
        /// Wall time spent in the child, if recorded.
        time: Option<Duration>,
    },

    /// The runner killed the child after an inactivity timeout.
    Timeout {
        /// The mapped exit code.
        code: i32,
        /// Wall time spent in the child, if recorded.
        time: Option<Duration>,
    },
}

impl<'a> JournalLine<'a> {
    /// Parses a line without its trailing newline. Returns `None` for blank lines.
    pub fn parse(line: &'a str) -> Option<Self> {
        if line.is_empty() {
            return None;
        }
        if let Some((code, time)) = line.strip_prefix("exit:").and_then(parse_code_and_time) {
            return Some(Self::Exit { code, time });
        }
        if let Some((code, time)) = line.strip_prefix("timeout:").and_then(parse_code_and_time) {
            return Some(Self::Timeout { code, time });
        }
        Some(Self::Subtest(line))
    }
}

impl fmt::Display for JournalLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (prefix, code, time) = match self {
            Self::Subtest(name) => return write!(f, "{name}"),
            Self::Exit { code, time } => ("exit", code, time),
            Self::Timeout { code, time } => ("timeout", code, time),
        };
        write!(f, "{prefix}:{code}")?;
        if let Some(time) = time {
            write!(f, " ({:.3}s)", time.as_secs_f64())?;
        }
        Ok(())
    }
}

/// Parses `<code>` or `<code> (<secs>s)`.
fn parse_code_and_time(rest: &str) -> Option<(i32, Option<Duration>)> {
    let (code, time) = match rest.split_once(' ') {
        Some((code, time)) => {
            let secs = time.strip_prefix('(')?.strip_suffix("s)")?;
            let secs: f64 = secs.parse().ok()?;
            (code, Duration::try_from_secs_f64(secs).ok())
        }
        None => (rest, None),
    };
    Some((code.parse().ok()?, time))
}

/// What a replayed journal means for its job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReplayOutcome {
    /// The child exited on its own. The job is done.
    Complete {
        /// The recorded exit code.
        exit_code: i32,
    },

    /// The child went away after starting some subtests. The job must run again with these
    /// selectors, which exclude every subtest already started.
    Interrupted {
        /// The rewritten selectors.
        pruned: Vec<String>,
    },

    /// The child went away before starting any subtest, or timed out again without starting a
    /// new one. There is nothing to run again.
    NothingToResume,
}

/// Folds journal lines into a [`ReplayOutcome`].
#[derive(Clone, Debug, Default)]
pub struct JournalReplay<'a> {
    started: Vec<&'a str>,
    exit_code: Option<i32>,
    timed_out: bool,
    // Whether a subtest started since the last timeout.
    progressed: bool,
    // The latest timeout hit before any new subtest started.
    stalled: bool,
}

impl<'a> JournalReplay<'a> {
    /// Creates an empty replay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays the full text of a journal.
    pub fn parse(contents: &'a str) -> Self {
        let mut replay = Self::new();
        for line in contents.lines().filter_map(JournalLine::parse) {
            replay.feed(line);
        }
        replay
    }

    /// Feeds one line.
    pub fn feed(&mut self, line: JournalLine<'a>) {
        match line {
            JournalLine::Subtest(name) => {
                self.started.push(name);
                self.progressed = true;
                self.stalled = false;
            }
            JournalLine::Exit { code, .. } => self.exit_code = Some(code),
            // The child did not finish on its own, so the job is not complete.
            JournalLine::Timeout { .. } => {
                self.timed_out = true;
                self.stalled = !self.progressed;
                self.progressed = false;
            }
        }
    }

    /// Returns the subtests started so far, in order.
    pub fn started(&self) -> &[&'a str] {
        &self.started
    }

    /// Returns true if the runner killed the child.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Computes the outcome for a job that was run with `selectors`.
    pub fn outcome(&self, selectors: &[String]) -> ReplayOutcome {
        if let Some(exit_code) = self.exit_code {
            return ReplayOutcome::Complete { exit_code };
        }
        // A re-run that timed out without starting anything new would only hang again.
        if self.started.is_empty() || self.stalled {
            return ReplayOutcome::NothingToResume;
        }

        let mut pruned = selectors.to_vec();
        if pruned.is_empty() {
            pruned.push("*".to_owned());
        }
        pruned.extend(self.started.iter().map(|name| format!("!{name}")));
        ReplayOutcome::Interrupted { pruned }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("first-subtest", Some(JournalLine::Subtest("first-subtest")) ; "subtest")]
    #[test_case("exit:0", Some(JournalLine::Exit { code: 0, time: None }) ; "bare exit")]
    #[test_case(
        "exit:77 (0.250s)",
        Some(JournalLine::Exit { code: 77, time: Some(Duration::from_millis(250)) })
        ; "exit with time"
    )]
    #[test_case(
        "timeout:-15 (2.500s)",
        Some(JournalLine::Timeout { code: -15, time: Some(Duration::from_millis(2500)) })
        ; "timeout"
    )]
    #[test_case("exit:abc", Some(JournalLine::Subtest("exit:abc")) ; "exit without code")]
    #[test_case("", None ; "blank")]
    fn parse_line(input: &str, expected: Option<JournalLine<'_>>) {
        assert_eq!(JournalLine::parse(input), expected);
    }

    #[test]
    fn display_line() {
        let line = JournalLine::Exit {
            code: 98,
            time: Some(Duration::from_millis(1234)),
        };
        assert_eq!(line.to_string(), "exit:98 (1.234s)");
        let line = JournalLine::Timeout {
            code: -9,
            time: None,
        };
        assert_eq!(line.to_string(), "timeout:-9");
    }

    #[test]
    fn interrupted_whole_binary() {
        let replay = JournalReplay::parse("first-subtest\n");
        assert_eq!(
            replay.outcome(&[]),
            ReplayOutcome::Interrupted {
                pruned: vec!["*".to_owned(), "!first-subtest".to_owned()],
            }
        );
    }

    #[test]
    fn interrupted_with_selectors() {
        let replay = JournalReplay::parse("first-subtest\nsecond-subtest\n");
        let selectors = vec!["first-subtest".to_owned(), "second-subtest".to_owned()];
        assert_eq!(
            replay.outcome(&selectors),
            ReplayOutcome::Interrupted {
                pruned: vec![
                    "first-subtest".to_owned(),
                    "second-subtest".to_owned(),
                    "!first-subtest".to_owned(),
                    "!second-subtest".to_owned(),
                ],
            }
        );
    }

    #[test]
    fn complete() {
        let replay = JournalReplay::parse("first-subtest\nsecond-subtest\nexit:0\n");
        assert_eq!(replay.outcome(&[]), ReplayOutcome::Complete { exit_code: 0 });
        assert_eq!(replay.started(), ["first-subtest", "second-subtest"]);
    }

    #[test]
    fn timeout_is_not_completion() {
        let replay = JournalReplay::parse("first-subtest\ntimeout:-15 (30.002s)\n");
        assert!(replay.timed_out());
        assert_eq!(
            replay.outcome(&[]),
            ReplayOutcome::Interrupted {
                pruned: vec!["*".to_owned(), "!first-subtest".to_owned()],
            }
        );
    }

    #[test]
    fn nothing_started() {
        assert_eq!(
            JournalReplay::parse("").outcome(&[]),
            ReplayOutcome::NothingToResume
        );
        assert_eq!(
            JournalReplay::parse("timeout:-9 (4.000s)\n").outcome(&["a".to_owned()]),
            ReplayOutcome::NothingToResume
        );
    }

    #[test]
    fn repeated_timeout_without_progress() {
        let replay = JournalReplay::parse(indoc! {"
            hang-one
            timeout:-15 (1.001s)
            timeout:-15 (1.001s)
        "});
        assert_eq!(replay.outcome(&[]), ReplayOutcome::NothingToResume);

        // Progress after the first timeout keeps the job resumable.
        let replay = JournalReplay::parse(indoc! {"
            hang-one
            timeout:-15 (1.001s)
            hang-two
            timeout:-15 (1.001s)
        "});
        assert_eq!(
            replay.outcome(&[]),
            ReplayOutcome::Interrupted {
                pruned: vec![
                    "*".to_owned(),
                    "!hang-one".to_owned(),
                    "!hang-two".to_owned(),
                ],
            }
        );
    }
}
