// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{FramingError, HEADER_SIZE};
use bytes::{Bytes, BytesMut};

/// The largest packet a [`PacketFramer`] accepts.
pub const MAX_PACKET_SIZE: u32 = 16 * 1024 * 1024;

/// Splits a byte stream from a test process into whole packets.
///
/// Stream sockets do not preserve message boundaries, so bytes are buffered until the size field
/// of the next packet is satisfied.
#[derive(Debug, Default)]
pub struct PacketFramer {
    buf: BytesMut,
    corrupt: bool,
}

impl PacketFramer {
    /// Creates a new, empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the stream. Ignored once the stream is corrupt.
    pub fn push(&mut self, data: &[u8]) {
        if !self.corrupt {
            self.buf.extend_from_slice(data);
        }
    }

    /// Returns the next complete packet, if one is buffered.
    pub fn next_packet(&mut self) -> Result<Option<Bytes>, FramingError> {
        if self.corrupt || self.buf.len() < 4 {
            return Ok(None);
        }

        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[..4]);
        let size = u32::from_ne_bytes(raw);

        if (size as usize) < HEADER_SIZE {
            let discarded = self.mark_corrupt();
            return Err(FramingError::UndersizedPacket { size, discarded });
        }
        if size > MAX_PACKET_SIZE {
            let discarded = self.mark_corrupt();
            return Err(FramingError::OversizedPacket { size, discarded });
        }
        if self.buf.len() < size as usize {
            return Ok(None);
        }

        Ok(Some(self.buf.split_to(size as usize).freeze()))
    }

    /// Returns true if an earlier packet had an impossible size.
    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    /// Returns the number of buffered bytes that do not yet form a whole packet.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn mark_corrupt(&mut self) -> usize {
        self.corrupt = true;
        let discarded = self.buf.len();
        self.buf = BytesMut::new();
        discarded
    }
}
