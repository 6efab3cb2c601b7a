// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! The protocol shared between IGT test binaries and `igt_runner`.
//!
//! A test binary that finds a runner socket in its environment reports its progress as a stream of
//! binary packets instead of (or in addition to) human-readable output. The runner frames that
//! stream with [`PacketFramer`], interprets each packet with [`PacketView`], and persists every
//! packet into a `comms` dump that can later be replayed with [`read_dump`].
//!
//! This crate also defines the exit codes test binaries and the runner use, in
//! [`IgtExitCode`] and [`RunnerExitCode`].

mod dump;
mod errors;
mod exit_codes;
mod framing;
mod packet;

pub use dump::*;
pub use errors::*;
pub use exit_codes::*;
pub use framing::*;
pub use packet::*;

/// The environment variable through which a runner passes the file descriptor of its socket to a
/// test binary.
pub const RUNNER_SOCKET_ENV: &str = "IGT_RUNNER_SOCKET";
