// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::NestingViolation,
    failure::{FailureFlag, FailureHandle},
    output::{HarnessOutput, ReportedKind, SubtestOutcome},
    selection::SubtestSelection,
    stack::{BlockKind, InterruptKind, SubtestStack, TestMode, is_valid_dynamic_name},
};
use igt_runnercomms::IgtExitCode;
use std::{sync::Arc, time::Instant};

/// The reason a block body stopped early.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Interrupt {
    /// A requirement was not met: the block is skipped.
    Skip(String),
    /// The block failed.
    Fail(String),
    /// The whole test run must stop. The process exits immediately.
    Abort(String),
}

/// The result of a block body.
pub type BlockResult = Result<(), Interrupt>;

/// Skips the current block.
pub fn skip(reason: impl Into<String>) -> BlockResult {
    Err(Interrupt::Skip(reason.into()))
}

/// Skips the current block unless `condition` holds.
pub fn require(condition: bool, reason: impl Into<String>) -> BlockResult {
    if condition { Ok(()) } else { skip(reason) }
}

/// Fails the current block.
pub fn fail(reason: impl Into<String>) -> BlockResult {
    Err(Interrupt::Fail(reason.into()))
}

/// Fails the current block unless `condition` holds.
pub fn assert(condition: bool, reason: impl Into<String>) -> BlockResult {
    if condition { Ok(()) } else { fail(reason) }
}

/// Aborts the whole test run.
pub fn abort(reason: impl Into<String>) -> BlockResult {
    Err(Interrupt::Abort(reason.into()))
}

/// What the harness does on a programming error or an abort.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FatalAction {
    /// Terminate the process: `SIGABRT` for programming errors, exit code 112 for aborts.
    Exit,
    /// Panic instead. Used to exercise the harness from unit tests.
    Panic,
}

/// Configures a [`Harness`].
#[derive(Debug)]
pub struct HarnessBuilder {
    mode: TestMode,
    list_only: bool,
    selection: Option<SubtestSelection>,
    output: HarnessOutput,
    fatal_action: FatalAction,
}

impl HarnessBuilder {
    /// Only list subtest names, without running any blocks.
    pub fn list_subtests(mut self, list_only: bool) -> Self {
        self.list_only = list_only;
        self
    }

    /// Only run the subtests `selection` selects.
    pub fn selection(mut self, selection: SubtestSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Sets the action taken on programming errors and aborts.
    pub fn fatal_action(mut self, fatal_action: FatalAction) -> Self {
        self.fatal_action = fatal_action;
        self
    }

    /// Collects output lines in memory instead of writing them. See [`Harness::output_lines`].
    pub fn buffer_output(mut self) -> Self {
        self.output = HarnessOutput::Buffer(Vec::new());
        self
    }

    /// Report to the runner socket passed in the environment, if there is one.
    pub fn output_from_env(mut self) -> Self {
        self.output = HarnessOutput::from_env();
        self
    }

    /// Builds the harness.
    pub fn build(self) -> Harness {
        Harness {
            stack: SubtestStack::new(self.mode),
            list_only: self.list_only,
            selection: self.selection,
            output: self.output,
            fatal_action: self.fatal_action,
            frames: Vec::new(),
            group_states: vec![None],
            top_level_flag: Arc::new(FailureFlag::default()),
            started: Instant::now(),
            summary: Summary::default(),
        }
    }
}

/// A reported block that is currently running.
#[derive(Debug)]
struct Frame {
    kind: BlockKind,
    flag: Arc<FailureFlag>,
    dynamic_count: usize,
    dynamic_failed: bool,
}

/// Totals over the subtests run so far. Dynamic subtests count through their container.
#[derive(Debug, Default)]
struct Summary {
    selected: usize,
    succeeded: usize,
    failed: usize,
}

/// Runs the blocks of one test binary and tracks their results.
///
/// Blocks are opened with [`Self::fixture`], [`Self::subtest_group`], [`Self::subtest`],
/// [`Self::subtest_with_dynamic`] and [`Self::dynamic`]. Each takes a body that receives the
/// harness back and returns a [`BlockResult`].
#[derive(Debug)]
pub struct Harness {
    stack: SubtestStack,
    list_only: bool,
    selection: Option<SubtestSelection>,
    output: HarnessOutput,
    fatal_action: FatalAction,
    frames: Vec<Frame>,
    // One entry per group level, starting with the top level. Set once a fixture at that level
    // skipped or failed: every later subtest at that level gets the same outcome without running.
    group_states: Vec<Option<SubtestOutcome>>,
    top_level_flag: Arc<FailureFlag>,
    started: Instant,
    summary: Summary,
}

impl Harness {
    /// Starts configuring a harness for a binary of the given mode.
    pub fn builder(mode: TestMode) -> HarnessBuilder {
        HarnessBuilder {
            mode,
            list_only: false,
            selection: None,
            output: HarnessOutput::Terminal,
            fatal_action: FatalAction::Exit,
        }
    }

    /// Returns true if only subtest names are being listed.
    pub fn is_listing(&self) -> bool {
        self.list_only
    }

    /// Returns the collected output lines, if the harness was built with
    /// [`HarnessBuilder::buffer_output`].
    pub fn output_lines(&self) -> Option<&[String]> {
        self.output.lines()
    }

    /// Writes an informational line.
    pub fn info(&mut self, text: &str) {
        self.output.info(text);
    }

    /// Reports the version of the test binary.
    pub fn version(&mut self, text: &str) {
        self.output.version(text);
    }

    /// Overrides the most recently reported result, e.g. with `timeout`.
    pub fn override_result(&mut self, result: &str) {
        self.output.result_override(result);
    }

    /// Returns a handle through which other threads can fail the innermost reported block.
    ///
    /// Outside any reported block, failures go to the test as a whole and are picked up when it
    /// finishes.
    pub fn failure_handle(&self) -> FailureHandle {
        let flag = self
            .frames
            .last()
            .map_or_else(|| self.top_level_flag.clone(), |frame| frame.flag.clone());
        FailureHandle::new(flag)
    }

    /// Runs setup or teardown shared by the subtests that follow it.
    ///
    /// Fixtures do not run while listing subtests, or once an earlier fixture at the same level has
    /// skipped or failed. A skip or failure inside a fixture applies to every later subtest of the
    /// enclosing group.
    pub fn fixture<F>(&mut self, body: F)
    where
        F: FnOnce(&mut Self) -> BlockResult,
    {
        self.push(BlockKind::Fixture);
        if self.list_only || self.current_group_state().is_some() {
            self.pop(BlockKind::Fixture);
            return;
        }

        let result = body(self);
        let outcome = self.interrupt_outcome(result);
        self.pop(BlockKind::Fixture);

        let outcome = match outcome {
            SubtestOutcome::Success => return,
            outcome => outcome,
        };
        match self.stack.mode() {
            TestMode::Simple => self.finish_simple(outcome),
            TestMode::Subtests => {
                if let Some(state) = self.group_states.last_mut() {
                    *state = Some(outcome);
                }
            }
        }
    }

    /// Runs a group of blocks. Fixture results inside the group do not leak out of it.
    pub fn subtest_group<F>(&mut self, body: F)
    where
        F: FnOnce(&mut Self) -> BlockResult,
    {
        self.push(BlockKind::SubtestGroup);
        let inherited = self.current_group_state().cloned();
        self.group_states.push(inherited);

        let result = body(self);
        // Interrupts cannot be attributed to a group.
        let outcome = self.interrupt_outcome(result);
        debug_assert_eq!(outcome, SubtestOutcome::Success);

        self.group_states.pop();
        self.pop(BlockKind::SubtestGroup);
    }

    /// Runs a subtest named `name`, if it is selected.
    pub fn subtest<F>(&mut self, name: &str, body: F)
    where
        F: FnOnce(&mut Self) -> BlockResult,
    {
        self.run_subtest(BlockKind::Subtest, name, body);
    }

    /// Runs a subtest named `name` whose result is made up of the dynamic subtests its body opens.
    ///
    /// The result is SKIP if the body opens no dynamic subtests, and FAIL if any of them failed.
    pub fn subtest_with_dynamic<F>(&mut self, name: &str, body: F)
    where
        F: FnOnce(&mut Self) -> BlockResult,
    {
        self.run_subtest(BlockKind::SubtestWithDynamic, name, body);
    }

    /// Runs a dynamic subtest. Only valid directly inside [`Self::subtest_with_dynamic`].
    pub fn dynamic<F>(&mut self, name: &str, body: F)
    where
        F: FnOnce(&mut Self) -> BlockResult,
    {
        self.check_push(BlockKind::Dynamic);
        if !is_valid_dynamic_name(name) {
            self.fatal(NestingViolation::InvalidDynamicName {
                name: name.to_owned(),
            });
        }

        let outcome = self.run_reported(BlockKind::Dynamic, ReportedKind::Dynamic, name, body);
        if let Some(container) = self.frames.last_mut() {
            container.dynamic_count += 1;
            if matches!(outcome, SubtestOutcome::Fail(_)) {
                container.dynamic_failed = true;
            }
        }
    }

    fn run_subtest<F>(&mut self, kind: BlockKind, name: &str, body: F)
    where
        F: FnOnce(&mut Self) -> BlockResult,
    {
        self.check_push(kind);
        if self.list_only {
            self.output.info(name);
            return;
        }
        if let Some(selection) = &self.selection {
            if !selection.is_selected(name) {
                return;
            }
        }
        self.summary.selected += 1;

        let outcome = match self.current_group_state().cloned() {
            Some(outcome) => {
                // A fixture already decided this subtest's fate.
                self.output.finished(
                    ReportedKind::Subtest,
                    name,
                    &outcome,
                    std::time::Duration::ZERO,
                );
                outcome
            }
            None => self.run_reported(kind, ReportedKind::Subtest, name, body),
        };

        match outcome {
            SubtestOutcome::Success => self.summary.succeeded += 1,
            SubtestOutcome::Skip(_) => {}
            SubtestOutcome::Fail(_) => self.summary.failed += 1,
        }
    }

    fn run_reported<F>(
        &mut self,
        kind: BlockKind,
        reported: ReportedKind,
        name: &str,
        body: F,
    ) -> SubtestOutcome
    where
        F: FnOnce(&mut Self) -> BlockResult,
    {
        self.push(kind);
        self.frames.push(Frame {
            kind,
            flag: Arc::new(FailureFlag::default()),
            dynamic_count: 0,
            dynamic_failed: false,
        });
        self.output.started(reported, name);
        let start = Instant::now();

        let result = body(self);
        let mut outcome = self.interrupt_outcome(result);
        let elapsed = start.elapsed();

        let frame = match self.frames.pop() {
            Some(frame) => frame,
            None => self.fatal(NestingViolation::UnbalancedPop {
                expected: None,
                closing: kind,
            }),
        };
        debug_assert_eq!(frame.kind, kind);
        self.pop(kind);

        // The stack only lets a container skip itself, so its failures come from dynamic subtests.
        if kind == BlockKind::SubtestWithDynamic {
            if frame.dynamic_failed {
                outcome = SubtestOutcome::Fail("a dynamic subtest failed".to_owned());
            } else if outcome == SubtestOutcome::Success && frame.dynamic_count == 0 {
                outcome = SubtestOutcome::Skip("no dynamic subtests were run".to_owned());
            }
        }

        if let Some(reason) = frame.flag.take() {
            if !matches!(outcome, SubtestOutcome::Fail(_)) {
                outcome = SubtestOutcome::Fail(reason);
            }
        }

        self.output.finished(reported, name, &outcome, elapsed);
        outcome
    }

    /// Converts the result of a block body into an outcome, checking that an interrupt may leave
    /// the innermost block. Must be called before that block is popped.
    fn interrupt_outcome(&mut self, result: BlockResult) -> SubtestOutcome {
        let (kind, outcome) = match result {
            Ok(()) => return SubtestOutcome::Success,
            Err(Interrupt::Abort(reason)) => self.abort(&reason),
            Err(Interrupt::Skip(reason)) => (InterruptKind::Skip, SubtestOutcome::Skip(reason)),
            Err(Interrupt::Fail(reason)) => (InterruptKind::Fail, SubtestOutcome::Fail(reason)),
        };
        if let Err(violation) = self.stack.check_interrupt(kind) {
            self.fatal(violation);
        }
        outcome
    }

    fn current_group_state(&self) -> Option<&SubtestOutcome> {
        self.group_states.last().and_then(Option::as_ref)
    }

    fn check_push(&mut self, kind: BlockKind) {
        if let Err(violation) = self.stack.check_push(kind) {
            self.fatal(violation);
        }
    }

    fn push(&mut self, kind: BlockKind) {
        if let Err(violation) = self.stack.push(kind) {
            self.fatal(violation);
        }
    }

    fn pop(&mut self, kind: BlockKind) {
        if let Err(violation) = self.stack.pop(kind) {
            self.fatal(violation);
        }
    }

    fn fatal(&mut self, violation: NestingViolation) -> ! {
        self.output
            .error(&format!("CRITICAL: Test harness misuse: {violation}"));
        match self.fatal_action {
            FatalAction::Exit => std::process::abort(),
            FatalAction::Panic => panic!("test harness misuse: {violation}"),
        }
    }

    fn abort(&mut self, reason: &str) -> ! {
        self.output.error("CRITICAL: Test abort requested");
        self.output.error(&format!("CRITICAL: {reason}"));
        match self.fatal_action {
            FatalAction::Exit => std::process::exit(IgtExitCode::ABORT),
            FatalAction::Panic => panic!("test abort: {reason}"),
        }
    }

    fn finish_simple(&mut self, outcome: SubtestOutcome) -> ! {
        let code = self.simple_exit_code(outcome);
        self.exit(code)
    }

    fn exit(&mut self, code: i32) -> ! {
        match self.fatal_action {
            FatalAction::Exit => std::process::exit(code),
            FatalAction::Panic => panic!("test exited with code {code}"),
        }
    }

    fn simple_exit_code(&mut self, mut outcome: SubtestOutcome) -> i32 {
        if let Some(reason) = self.top_level_flag.take() {
            if !matches!(outcome, SubtestOutcome::Fail(_)) {
                outcome = SubtestOutcome::Fail(reason);
            }
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        match &outcome {
            SubtestOutcome::Success => {}
            SubtestOutcome::Skip(reason) => {
                self.output.info(&format!("Test requirement not met: {reason}"));
            }
            SubtestOutcome::Fail(reason) => self.output.error(&format!("Test failed: {reason}")),
        }
        self.output
            .info(&format!("{} ({elapsed:.3}s)", outcome.as_str()));
        match outcome {
            SubtestOutcome::Success => IgtExitCode::SUCCESS,
            SubtestOutcome::Skip(_) => IgtExitCode::SKIP,
            SubtestOutcome::Fail(_) => IgtExitCode::FAILURE,
        }
    }

    /// Finishes a test with subtests, given the result of its top-level body, and returns the
    /// exit code the process should exit with.
    pub fn finish_subtests(&mut self, result: BlockResult) -> i32 {
        let outcome = self.interrupt_outcome(result);
        debug_assert_eq!(outcome, SubtestOutcome::Success);

        if self.list_only {
            return IgtExitCode::SUCCESS;
        }
        if let Some(reason) = self.top_level_flag.take() {
            self.output
                .error(&format!("Failure outside of any subtest: {reason}"));
            return IgtExitCode::FAILURE;
        }
        if let Some(selection) = &self.selection {
            if self.summary.selected == 0 {
                let message = format!("Unknown subtest: {}", selection.as_str());
                self.output.error(&message);
                return IgtExitCode::INVALID;
            }
        }

        if self.summary.failed > 0 {
            IgtExitCode::FAILURE
        } else if self.summary.succeeded == 0 {
            IgtExitCode::SKIP
        } else {
            IgtExitCode::SUCCESS
        }
    }

    /// Finishes a simple test, given the result of its body, and returns the exit code the process
    /// should exit with.
    pub fn finish_simple_test(&mut self, result: BlockResult) -> i32 {
        if self.list_only {
            return IgtExitCode::INVALID;
        }
        let outcome = self.interrupt_outcome(result);
        self.simple_exit_code(outcome)
    }
}
