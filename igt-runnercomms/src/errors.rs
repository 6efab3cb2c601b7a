// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt};

/// An error that occurs while reading a dump of runner packets.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DumpError {
    /// The four bytes before a packet were not [`DUMP_CANARY`](crate::DUMP_CANARY).
    BadCanary {
        /// The offset of the canary within the dump.
        offset: usize,
        /// The value found instead.
        found: u32,
    },

    /// The dump ended in the middle of a packet.
    Truncated {
        /// The offset of the incomplete packet within the dump.
        offset: usize,
        /// The number of bytes the packet claimed, or the header size if the header itself was
        /// cut off.
        expected: usize,
        /// The number of bytes remaining in the dump.
        remaining: usize,
    },

    /// A packet declared a size smaller than its own header.
    InvalidSize {
        /// The offset of the packet within the dump.
        offset: usize,
        /// The declared size.
        size: u32,
    },

    /// The visitor asked to stop before the end of the dump.
    Stopped {
        /// The offset of the packet the visitor stopped at.
        offset: usize,
    },
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadCanary { offset, found } => {
                write!(
                    f,
                    "invalid canary at offset {offset}: expected {:#010x}, found {found:#010x}",
                    crate::DUMP_CANARY
                )
            }
            Self::Truncated {
                offset,
                expected,
                remaining,
            } => {
                write!(
                    f,
                    "truncated packet at offset {offset}: expected {expected} bytes, \
                     {remaining} remaining"
                )
            }
            Self::InvalidSize { offset, size } => {
                write!(
                    f,
                    "packet at offset {offset} declares size {size}, smaller than its header"
                )
            }
            Self::Stopped { offset } => {
                write!(f, "reading stopped at packet offset {offset}")
            }
        }
    }
}

impl error::Error for DumpError {}

/// An error that makes a live packet stream unusable.
///
/// Once a [`PacketFramer`](crate::PacketFramer) reports this error it discards everything it has
/// and ignores further input.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FramingError {
    /// A packet declared a size smaller than the header.
    UndersizedPacket {
        /// The declared size.
        size: u32,
        /// The number of buffered bytes that were thrown away.
        discarded: usize,
    },

    /// A packet declared a size above [`MAX_PACKET_SIZE`](crate::MAX_PACKET_SIZE).
    OversizedPacket {
        /// The declared size.
        size: u32,
        /// The number of buffered bytes that were thrown away.
        discarded: usize,
    },
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UndersizedPacket { size, discarded } => {
                write!(
                    f,
                    "packet declares size {size}, smaller than the header \
                     (discarded {discarded} bytes)"
                )
            }
            Self::OversizedPacket { size, discarded } => {
                write!(
                    f,
                    "packet declares size {size}, larger than the maximum of {} \
                     (discarded {discarded} bytes)",
                    crate::MAX_PACKET_SIZE
                )
            }
        }
    }
}

impl error::Error for FramingError {}
