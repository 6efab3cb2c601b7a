// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The on-disk `comms` file: a sequence of packets, each preceded by [`DUMP_CANARY`].

use crate::{DumpError, HEADER_SIZE, PacketHeader, PacketType, PacketView};
use std::{io, ops::ControlFlow};

/// The marker written before each packet in a dump: `IGT1` packed into a native-endian `u32`.
pub const DUMP_CANARY: u32 =
    ((b'I' as u32) << 24) | ((b'G' as u32) << 16) | ((b'T' as u32) << 8) | (b'1' as u32);

/// Appends one packet to a dump.
pub fn write_dump_packet<W: io::Write + ?Sized>(writer: &mut W, packet: &[u8]) -> io::Result<()> {
    writer.write_all(&DUMP_CANARY.to_ne_bytes())?;
    writer.write_all(packet)
}

/// The outcome of a successful [`read_dump`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DumpStatus {
    /// The dump held nothing but `EXEC` packets (or nothing at all): the test never said anything.
    Empty,
    /// The dump held at least one packet other than `EXEC`.
    Success,
}

/// Receives every packet of a dump, in order.
pub trait CommsVisitor {
    /// Called once per packet. Returning [`ControlFlow::Break`] stops reading.
    fn visit(&mut self, header: &PacketHeader, view: PacketView<'_>) -> ControlFlow<()>;
}

impl<F> CommsVisitor for F
where
    F: FnMut(&PacketHeader, PacketView<'_>) -> ControlFlow<()>,
{
    fn visit(&mut self, header: &PacketHeader, view: PacketView<'_>) -> ControlFlow<()> {
        self(header, view)
    }
}

/// Reads a whole dump, handing each packet to `visitor`.
///
/// Packets that fail validation are still visited, as [`PacketView::Invalid`].
pub fn read_dump<V: CommsVisitor + ?Sized>(
    data: &[u8],
    visitor: &mut V,
) -> Result<DumpStatus, DumpError> {
    let mut status = DumpStatus::Empty;
    let mut offset = 0;

    while offset < data.len() {
        let rest = &data[offset..];
        if rest.len() < 4 {
            return Err(DumpError::Truncated {
                offset,
                expected: 4,
                remaining: rest.len(),
            });
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&rest[..4]);
        let canary = u32::from_ne_bytes(raw);
        if canary != DUMP_CANARY {
            return Err(DumpError::BadCanary {
                offset,
                found: canary,
            });
        }
        offset += 4;

        let rest = &data[offset..];
        let Some(header) = PacketHeader::read(rest) else {
            return Err(DumpError::Truncated {
                offset,
                expected: HEADER_SIZE,
                remaining: rest.len(),
            });
        };
        let size = header.size as usize;
        if size < HEADER_SIZE {
            return Err(DumpError::InvalidSize {
                offset,
                size: header.size,
            });
        }
        if rest.len() < size {
            return Err(DumpError::Truncated {
                offset,
                expected: size,
                remaining: rest.len(),
            });
        }

        if header.packet_type != PacketType::Exec.as_raw() {
            status = DumpStatus::Success;
        }

        let view = PacketView::decode(&rest[..size]);
        if visitor.visit(&header, view).is_break() {
            return Err(DumpError::Stopped { offset });
        }
        offset += size;
    }

    Ok(status)
}
