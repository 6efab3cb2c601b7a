// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The stack of open blocks and the rules for what may be opened where.

use crate::errors::NestingViolation;
use std::fmt;

/// The kind of a block on the [`SubtestStack`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BlockKind {
    /// Setup or teardown shared by the subtests that follow it.
    Fixture,
    /// A group of subtests and fixtures. Groups may nest.
    SubtestGroup,
    /// A single reportable subtest.
    Subtest,
    /// A subtest whose results come from the dynamic subtests it opens.
    SubtestWithDynamic,
    /// A dynamic subtest, named at runtime.
    Dynamic,
}

impl BlockKind {
    /// Returns true if entering this block produces a start and a result event.
    pub fn is_reported(self) -> bool {
        matches!(
            self,
            Self::Subtest | Self::SubtestWithDynamic | Self::Dynamic
        )
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fixture => "fixture",
            Self::SubtestGroup => "subtest group",
            Self::Subtest => "subtest",
            Self::SubtestWithDynamic => "subtest with dynamic subtests",
            Self::Dynamic => "dynamic subtest",
        };
        f.write_str(s)
    }
}

/// Whether a test binary declares subtests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestMode {
    /// The binary consists of subtests, run through [`subtest_main`](crate::subtest_main).
    Subtests,
    /// The binary is a single test, run through [`simple_main`](crate::simple_main).
    Simple,
}

/// The kind of an interrupt leaving a block, for legality checks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InterruptKind {
    /// A skip.
    Skip,
    /// A failure.
    Fail,
}

impl fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => f.write_str("skip"),
            Self::Fail => f.write_str("failure"),
        }
    }
}

/// The open blocks of a test binary, innermost last.
///
/// The stack itself never aborts anything: every illegal operation is returned as a
/// [`NestingViolation`] for the caller to act on.
#[derive(Clone, Debug)]
pub struct SubtestStack {
    mode: TestMode,
    frames: Vec<BlockKind>,
}

impl SubtestStack {
    /// Creates an empty stack for a binary of the given mode.
    pub fn new(mode: TestMode) -> Self {
        Self {
            mode,
            frames: Vec::new(),
        }
    }

    /// Returns the mode this stack was created with.
    pub fn mode(&self) -> TestMode {
        self.mode
    }

    /// Returns the innermost open block, or `None` at the top level.
    pub fn innermost(&self) -> Option<BlockKind> {
        self.frames.last().copied()
    }

    /// Returns the number of open blocks.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Checks whether `child` may be opened at the current position.
    pub fn check_push(&self, child: BlockKind) -> Result<(), NestingViolation> {
        let parent = self.innermost();
        if is_allowed(self.mode, parent, child) {
            Ok(())
        } else if self.mode == TestMode::Simple {
            Err(NestingViolation::NotInSimpleTest { child })
        } else {
            Err(NestingViolation::IllegalChild { parent, child })
        }
    }

    /// Opens `child`.
    pub fn push(&mut self, child: BlockKind) -> Result<(), NestingViolation> {
        self.check_push(child)?;
        self.frames.push(child);
        Ok(())
    }

    /// Closes the innermost block, which must be of kind `closing`.
    pub fn pop(&mut self, closing: BlockKind) -> Result<(), NestingViolation> {
        match self.innermost() {
            Some(kind) if kind == closing => {
                self.frames.pop();
                Ok(())
            }
            expected => Err(NestingViolation::UnbalancedPop { expected, closing }),
        }
    }

    /// Checks whether an interrupt of `kind` may leave the innermost block.
    ///
    /// Skips and failures must be attributable to something that reports a result. A subtest
    /// with dynamic subtests may skip itself but may only fail through its dynamic subtests.
    pub fn check_interrupt(&self, kind: InterruptKind) -> Result<(), NestingViolation> {
        let parent = self.innermost();
        let allowed = match (self.mode, parent, kind) {
            (TestMode::Simple, None | Some(BlockKind::Fixture), _) => true,
            (
                TestMode::Subtests,
                Some(BlockKind::Subtest | BlockKind::Fixture | BlockKind::Dynamic),
                _,
            ) => true,
            (TestMode::Subtests, Some(BlockKind::SubtestWithDynamic), InterruptKind::Skip) => true,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(NestingViolation::UnattributedInterrupt { kind, parent })
        }
    }
}

fn is_allowed(mode: TestMode, parent: Option<BlockKind>, child: BlockKind) -> bool {
    use BlockKind::*;

    match mode {
        // Simple tests may only set up and tear down at the top level.
        TestMode::Simple => parent.is_none() && child == Fixture,
        TestMode::Subtests => match parent {
            None | Some(SubtestGroup) => {
                matches!(child, Fixture | SubtestGroup | Subtest | SubtestWithDynamic)
            }
            Some(SubtestWithDynamic) => child == Dynamic,
            Some(Fixture | Subtest | Dynamic) => false,
        },
    }
}

/// Returns true if `name` is usable as a dynamic subtest name: one or more ASCII letters, digits,
/// underscores or dashes.
pub fn is_valid_dynamic_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
