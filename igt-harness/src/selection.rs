// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selecting subtests with `--run-subtest`.

use crate::errors::GlobConstructError;

/// A glob pattern over subtest names.
///
/// We do not use `globset::GlobMatcher` directly because it has path-like semantics, so the glob
/// is converted to a regex instead.
#[derive(Clone, Debug)]
pub struct SubtestGlob {
    glob_str: String,
    regex: regex::bytes::Regex,
}

impl SubtestGlob {
    /// Compiles a glob. `*` matches any run of characters and `?` matches a single character.
    pub fn new(glob_str: &str) -> Result<Self, GlobConstructError> {
        let glob = globset::GlobBuilder::new(glob_str)
            .backslash_escape(false)
            .build()
            .map_err(|error| GlobConstructError::InvalidGlob {
                glob: glob_str.to_owned(),
                error,
            })?;

        let regex = regex::bytes::Regex::new(glob.regex()).map_err(|error| {
            GlobConstructError::RegexError {
                glob: glob_str.to_owned(),
                message: error.to_string(),
            }
        })?;

        Ok(Self {
            glob_str: glob_str.to_owned(),
            regex,
        })
    }

    /// Returns the glob string.
    pub fn as_str(&self) -> &str {
        &self.glob_str
    }

    /// Returns true if this glob matches the given name.
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name.as_bytes())
    }
}

#[derive(Clone, Debug)]
struct SelectionPattern {
    exclude: bool,
    glob: SubtestGlob,
}

/// A parsed `--run-subtest` list such as `*,!slow-*,slow-but-important`.
///
/// Patterns are comma-separated. A name is selected according to the last pattern that matches
/// it: selected unless that pattern starts with `!`. A name no pattern matches is not selected.
#[derive(Clone, Debug)]
pub struct SubtestSelection {
    raw: String,
    patterns: Vec<SelectionPattern>,
}

impl SubtestSelection {
    /// Parses a comma-separated selection list. Empty items are ignored.
    pub fn parse(list: &str) -> Result<Self, GlobConstructError> {
        let patterns = list
            .split(',')
            .filter(|item| !item.is_empty())
            .map(|item| {
                let (exclude, glob) = match item.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, item),
                };
                Ok(SelectionPattern {
                    exclude,
                    glob: SubtestGlob::new(glob)?,
                })
            })
            .collect::<Result<Vec<_>, GlobConstructError>>()?;

        Ok(Self {
            raw: list.to_owned(),
            patterns,
        })
    }

    /// Returns the list this selection was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if `name` is selected.
    pub fn is_selected(&self, name: &str) -> bool {
        self.patterns
            .iter()
            .rev()
            .find(|pattern| pattern.glob.is_match(name))
            .is_some_and(|pattern| !pattern.exclude)
    }
}
