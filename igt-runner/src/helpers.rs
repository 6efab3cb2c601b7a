// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "job" if `count` is 1, otherwise "jobs".
    pub fn jobs_str(count: usize) -> &'static str {
        if count == 1 { "job" } else { "jobs" }
    }

    /// Returns "device" if `count` is 1, otherwise "devices".
    pub fn devices_str(count: usize) -> &'static str {
        if count == 1 { "device" } else { "devices" }
    }
}

/// Returns the number of decimal digits in `n`, with 0 counting as one digit.
pub(crate) fn usize_decimal_char_width(n: usize) -> usize {
    // checked_ilog10 returns 0 for 1-9, 1 for 10-99, 2 for 100-999, etc. (And
    // None for 0 which we map to the same as 1.)
    n.checked_ilog10().map_or(0, |log| log as usize) + 1
}

/// Formats a duration the way journals and result packets do: seconds with three decimals.
pub(crate) fn format_secs(duration: std::time::Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}
