// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the harness.

use crate::stack::{BlockKind, InterruptKind};
use std::fmt;
use thiserror::Error;

/// A programming error in a test binary: a block or interrupt in a place the harness forbids.
///
/// These are never reported as test failures. The harness treats them as fatal.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NestingViolation {
    /// A subtest-related block was opened in a simple test.
    #[error("{child} is not allowed in a simple test")]
    NotInSimpleTest {
        /// The block that was opened.
        child: BlockKind,
    },

    /// A block was opened inside a parent that does not allow it.
    #[error("{child} is not allowed inside {}", DisplayParent(*.parent))]
    IllegalChild {
        /// The innermost open block, or `None` at the top level.
        parent: Option<BlockKind>,
        /// The block that was opened.
        child: BlockKind,
    },

    /// A skip or failure left a block that cannot report it.
    #[error("{kind} raised inside {}, which has no result to attribute it to", DisplayParent(*.parent))]
    UnattributedInterrupt {
        /// Whether it was a skip or a failure.
        kind: InterruptKind,
        /// The innermost open block, or `None` at the top level.
        parent: Option<BlockKind>,
    },

    /// A dynamic subtest name contained characters other than `[A-Za-z0-9_-]`.
    #[error("invalid dynamic subtest name `{name}`")]
    InvalidDynamicName {
        /// The rejected name.
        name: String,
    },

    /// A block was closed while a different block was innermost.
    #[error("closing {closing} while the innermost block is {}", DisplayParent(*.expected))]
    UnbalancedPop {
        /// The innermost open block.
        expected: Option<BlockKind>,
        /// The block being closed.
        closing: BlockKind,
    },
}

struct DisplayParent(Option<BlockKind>);

impl fmt::Display for DisplayParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(kind) => write!(f, "a {kind}"),
            None => f.write_str("the top level"),
        }
    }
}

/// An error constructing a [`SubtestGlob`](crate::SubtestGlob).
#[derive(Clone, Debug, Error)]
pub enum GlobConstructError {
    /// The glob is invalid.
    #[error("invalid glob `{glob}`")]
    InvalidGlob {
        /// The glob text.
        glob: String,
        /// The underlying error.
        #[source]
        error: globset::Error,
    },

    /// The glob could not be converted to a regex.
    #[error("glob `{glob}` could not be compiled: {message}")]
    RegexError {
        /// The glob text.
        glob: String,
        /// The regex error, as text.
        message: String,
    },
}
