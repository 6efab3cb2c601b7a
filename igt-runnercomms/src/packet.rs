// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Construction and validation of individual runner packets.
//!
//! A packet is a fixed 16-byte header followed by a type-specific payload. All integers are in
//! native byte order, matching what a test binary and the runner on the same machine agree on.
//!
//! ```text
//! +--------+--------+------------+------------+-----------------------------+
//! | size   | type   | sender pid | sender tid | payload (ints, then cstrs)  |
//! | u32    | u32    | i32        | i32        | ...                         |
//! +--------+--------+------------+------------+-----------------------------+
//! ```
//!
//! `size` covers the whole packet including the header, and is the only thing that determines how
//! many bytes of a buffer belong to a packet. Decoding never looks past it.

use std::fmt;

/// The size of the fixed packet header, in bytes.
pub const HEADER_SIZE: usize = 16;

/// The kind of a runner packet, as stored in the header's `type` field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(u32)]
pub enum PacketType {
    /// Not a valid packet. Produced only by failed validation.
    Invalid = 0,
    /// A line of log output.
    Log = 1,
    /// The command line the runner is about to execute.
    Exec = 2,
    /// The test process exited.
    Exit = 3,
    /// A subtest started.
    SubtestStart = 4,
    /// A subtest finished.
    SubtestResult = 5,
    /// A dynamic subtest started.
    DynamicSubtestStart = 6,
    /// A dynamic subtest finished.
    DynamicSubtestResult = 7,
    /// The version of the running test.
    VersionString = 8,
    /// Overrides the most recent result.
    ResultOverride = 9,
}

impl PacketType {
    /// Converts the raw header value to a packet type, if it is known.
    pub fn from_raw(raw: u32) -> Option<Self> {
        let ty = match raw {
            0 => Self::Invalid,
            1 => Self::Log,
            2 => Self::Exec,
            3 => Self::Exit,
            4 => Self::SubtestStart,
            5 => Self::SubtestResult,
            6 => Self::DynamicSubtestStart,
            7 => Self::DynamicSubtestResult,
            8 => Self::VersionString,
            9 => Self::ResultOverride,
            _ => return None,
        };
        Some(ty)
    }

    /// Returns the raw header value.
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Returns the protocol name of this packet type.
    pub fn name(self) -> &'static str {
        match self {
            Self::Invalid => "INVALID",
            Self::Log => "LOG",
            Self::Exec => "EXEC",
            Self::Exit => "EXIT",
            Self::SubtestStart => "SUBTEST_START",
            Self::SubtestResult => "SUBTEST_RESULT",
            Self::DynamicSubtestStart => "DYNAMIC_SUBTEST_START",
            Self::DynamicSubtestResult => "DYNAMIC_SUBTEST_RESULT",
            Self::VersionString => "VERSIONSTRING",
            Self::ResultOverride => "RESULT_OVERRIDE",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The fixed header at the start of every packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PacketHeader {
    /// Total size of the packet in bytes, header included.
    pub size: u32,
    /// The raw packet type. May not correspond to a known [`PacketType`].
    pub packet_type: u32,
    /// The process ID of the sender.
    pub sender_pid: i32,
    /// The thread ID of the sender.
    pub sender_tid: i32,
}

impl PacketHeader {
    /// Reads a header from the start of `bytes`. Returns `None` if fewer than [`HEADER_SIZE`] bytes
    /// are available.
    pub fn read(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            size: read_u32(bytes, 0),
            packet_type: read_u32(bytes, 4),
            sender_pid: read_u32(bytes, 8).cast_signed(),
            sender_tid: read_u32(bytes, 12).cast_signed(),
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(raw)
}

/// An encoded runner packet.
///
/// Packets are built in one shot by the constructors on this type and are not mutated afterwards,
/// with the exception of [`Self::set_size`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunnerPacket {
    buf: Vec<u8>,
}

impl RunnerPacket {
    /// A line of log output. `stream` is 1 for stdout and 2 for stderr.
    pub fn log(stream: u8, text: &str) -> Self {
        PacketBuilder::new(PacketType::Log)
            .u8(stream)
            .cstr(text)
            .finish()
    }

    /// The command line about to be executed, with arguments joined by single spaces.
    pub fn exec<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cmdline = String::new();
        for (i, arg) in argv.into_iter().enumerate() {
            if i != 0 {
                cmdline.push(' ');
            }
            cmdline.push_str(arg.as_ref());
        }
        PacketBuilder::new(PacketType::Exec)
            .cstr(&cmdline)
            .finish()
    }

    /// The test process exited with `exit_code` after `time_used` seconds (as text).
    pub fn exit(exit_code: i32, time_used: &str) -> Self {
        PacketBuilder::new(PacketType::Exit)
            .i32(exit_code)
            .cstr(time_used)
            .finish()
    }

    /// A subtest named `name` started.
    pub fn subtest_start(name: &str) -> Self {
        PacketBuilder::new(PacketType::SubtestStart)
            .cstr(name)
            .finish()
    }

    /// A subtest finished. `reason` may be empty.
    pub fn subtest_result(name: &str, result: &str, time_used: &str, reason: &str) -> Self {
        PacketBuilder::new(PacketType::SubtestResult)
            .cstr(name)
            .cstr(result)
            .cstr(time_used)
            .cstr(reason)
            .finish()
    }

    /// A dynamic subtest named `name` started.
    pub fn dynamic_subtest_start(name: &str) -> Self {
        PacketBuilder::new(PacketType::DynamicSubtestStart)
            .cstr(name)
            .finish()
    }

    /// A dynamic subtest finished. `reason` may be empty.
    pub fn dynamic_subtest_result(name: &str, result: &str, time_used: &str, reason: &str) -> Self {
        PacketBuilder::new(PacketType::DynamicSubtestResult)
            .cstr(name)
            .cstr(result)
            .cstr(time_used)
            .cstr(reason)
            .finish()
    }

    /// The version string of the running test.
    pub fn versionstring(text: &str) -> Self {
        PacketBuilder::new(PacketType::VersionString)
            .cstr(text)
            .finish()
    }

    /// Overrides the most recent result with `result` (lowercase text, e.g. `timeout`).
    pub fn result_override(result: &str) -> Self {
        PacketBuilder::new(PacketType::ResultOverride)
            .cstr(result)
            .finish()
    }

    /// Returns the header of this packet.
    pub fn header(&self) -> PacketHeader {
        // The buffer always holds at least a header.
        PacketHeader {
            size: read_u32(&self.buf, 0),
            packet_type: read_u32(&self.buf, 4),
            sender_pid: read_u32(&self.buf, 8).cast_signed(),
            sender_tid: read_u32(&self.buf, 12).cast_signed(),
        }
    }

    /// Returns the declared size of this packet.
    pub fn size(&self) -> u32 {
        read_u32(&self.buf, 0)
    }

    /// Overwrites the declared size without touching the buffer.
    ///
    /// This exists to simulate corrupted packets.
    pub fn set_size(&mut self, size: u32) {
        self.buf[0..4].copy_from_slice(&size.to_ne_bytes());
    }

    /// Returns the packet bytes to send over the wire: the buffer truncated to the declared size.
    pub fn as_bytes(&self) -> &[u8] {
        let size = (self.size() as usize).min(self.buf.len());
        &self.buf[..size]
    }

    /// Returns the whole underlying buffer, regardless of the declared size.
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Decodes this packet.
    pub fn decode(&self) -> PacketView<'_> {
        PacketView::decode(&self.buf)
    }
}

struct PacketBuilder {
    buf: Vec<u8>,
}

impl PacketBuilder {
    fn new(packet_type: PacketType) -> Self {
        let (pid, tid) = sender_ids();
        let mut buf = Vec::with_capacity(HEADER_SIZE + 32);
        // The size is filled in by finish().
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&packet_type.as_raw().to_ne_bytes());
        buf.extend_from_slice(&pid.to_ne_bytes());
        buf.extend_from_slice(&tid.to_ne_bytes());
        Self { buf }
    }

    fn u8(mut self, value: u8) -> Self {
        self.buf.push(value);
        self
    }

    fn i32(mut self, value: i32) -> Self {
        self.buf.extend_from_slice(&value.to_ne_bytes());
        self
    }

    fn cstr(mut self, s: &str) -> Self {
        // An embedded NUL would end the string early on the reading side and shift every
        // following field, so cut the string there instead.
        let s = match s.find('\0') {
            Some(idx) => &s[..idx],
            None => s,
        };
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        self
    }

    fn finish(mut self) -> RunnerPacket {
        let size = u32::try_from(self.buf.len()).unwrap_or(u32::MAX);
        self.buf[0..4].copy_from_slice(&size.to_ne_bytes());
        RunnerPacket { buf: self.buf }
    }
}

#[cfg(target_os = "linux")]
fn sender_ids() -> (i32, i32) {
    let pid = std::process::id().cast_signed();
    // SAFETY: gettid has no preconditions and cannot fail.
    let tid = unsafe { libc::gettid() };
    (pid, tid)
}

#[cfg(not(target_os = "linux"))]
fn sender_ids() -> (i32, i32) {
    let pid = std::process::id().cast_signed();
    (pid, pid)
}

/// The result fields shared by subtest and dynamic subtest results.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResultView<'a> {
    /// The name of the (dynamic) subtest.
    pub name: &'a str,
    /// The result, e.g. `SUCCESS`, `SKIP` or `FAIL`.
    pub result: &'a str,
    /// The time taken in seconds, as text.
    pub time_used: Option<&'a str>,
    /// The reason for the result. Empty or missing for successes.
    pub reason: Option<&'a str>,
}

impl<'a> ResultView<'a> {
    fn read(reader: &mut FieldReader<'a>) -> Option<Self> {
        let name = reader.cstr()?;
        let result = reader.cstr()?;
        let time_used = reader.cstr();
        let reason = reader.cstr();
        Some(Self {
            name,
            result,
            time_used,
            reason,
        })
    }
}

/// A validated, read-only view of a packet.
///
/// Every string borrowed by a view was checked to be NUL-terminated within the packet's declared
/// size and to be valid UTF-8.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketView<'a> {
    /// The packet failed validation or has an unknown type.
    Invalid,
    /// See [`RunnerPacket::log`].
    Log {
        /// 1 for stdout, 2 for stderr.
        stream: u8,
        /// The logged text.
        text: &'a str,
    },
    /// See [`RunnerPacket::exec`].
    Exec {
        /// The space-separated command line.
        cmdline: &'a str,
    },
    /// See [`RunnerPacket::exit`].
    Exit {
        /// The exit code.
        exit_code: i32,
        /// The time taken in seconds, as text.
        time_used: Option<&'a str>,
    },
    /// See [`RunnerPacket::subtest_start`].
    SubtestStart {
        /// The subtest name.
        name: &'a str,
    },
    /// See [`RunnerPacket::subtest_result`].
    SubtestResult(ResultView<'a>),
    /// See [`RunnerPacket::dynamic_subtest_start`].
    DynamicSubtestStart {
        /// The dynamic subtest name.
        name: &'a str,
    },
    /// See [`RunnerPacket::dynamic_subtest_result`].
    DynamicSubtestResult(ResultView<'a>),
    /// See [`RunnerPacket::versionstring`].
    VersionString {
        /// The version text.
        text: &'a str,
    },
    /// See [`RunnerPacket::result_override`].
    ResultOverride {
        /// The overriding result.
        result: &'a str,
    },
}

impl<'a> PacketView<'a> {
    /// Validates and decodes the packet at the start of `bytes`.
    ///
    /// Returns [`PacketView::Invalid`] if the declared size is smaller than the header or larger
    /// than `bytes`, if a required field is missing or unterminated, or if the type is unknown.
    pub fn decode(bytes: &'a [u8]) -> Self {
        let Some(header) = PacketHeader::read(bytes) else {
            return Self::Invalid;
        };
        let size = header.size as usize;
        if size < HEADER_SIZE || bytes.len() < size {
            return Self::Invalid;
        }
        let Some(packet_type) = PacketType::from_raw(header.packet_type) else {
            return Self::Invalid;
        };

        let mut reader = FieldReader::new(&bytes[HEADER_SIZE..size]);
        Self::decode_payload(packet_type, &mut reader).unwrap_or(Self::Invalid)
    }

    fn decode_payload(packet_type: PacketType, reader: &mut FieldReader<'a>) -> Option<Self> {
        let view = match packet_type {
            PacketType::Invalid => return None,
            PacketType::Log => {
                let stream = reader.u8()?;
                let text = reader.cstr()?;
                Self::Log { stream, text }
            }
            PacketType::Exec => Self::Exec {
                cmdline: reader.cstr()?,
            },
            PacketType::Exit => {
                let exit_code = reader.i32()?;
                let time_used = reader.cstr();
                Self::Exit {
                    exit_code,
                    time_used,
                }
            }
            PacketType::SubtestStart => Self::SubtestStart {
                name: reader.cstr()?,
            },
            PacketType::SubtestResult => Self::SubtestResult(ResultView::read(reader)?),
            PacketType::DynamicSubtestStart => Self::DynamicSubtestStart {
                name: reader.cstr()?,
            },
            PacketType::DynamicSubtestResult => {
                Self::DynamicSubtestResult(ResultView::read(reader)?)
            }
            PacketType::VersionString => Self::VersionString {
                text: reader.cstr()?,
            },
            PacketType::ResultOverride => Self::ResultOverride {
                result: reader.cstr()?,
            },
        };
        Some(view)
    }

    /// Returns the type of this view.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Invalid => PacketType::Invalid,
            Self::Log { .. } => PacketType::Log,
            Self::Exec { .. } => PacketType::Exec,
            Self::Exit { .. } => PacketType::Exit,
            Self::SubtestStart { .. } => PacketType::SubtestStart,
            Self::SubtestResult(_) => PacketType::SubtestResult,
            Self::DynamicSubtestStart { .. } => PacketType::DynamicSubtestStart,
            Self::DynamicSubtestResult(_) => PacketType::DynamicSubtestResult,
            Self::VersionString { .. } => PacketType::VersionString,
            Self::ResultOverride { .. } => PacketType::ResultOverride,
        }
    }

    /// Returns a value that displays this packet in the one-line format used by
    /// `igt_comms_decoder`.
    pub fn display<'b>(&'b self, header: &'b PacketHeader) -> DisplayPacket<'a, 'b> {
        DisplayPacket { header, view: self }
    }
}

/// Reads payload fields in order. Once a read fails, every later read fails too.
struct FieldReader<'a> {
    rest: &'a [u8],
}

impl<'a> FieldReader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { rest: payload }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.rest.len() < n {
            self.rest = &[];
            return None;
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn i32(&mut self) -> Option<i32> {
        let bytes = self.take(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Some(i32::from_ne_bytes(raw))
    }

    fn cstr(&mut self) -> Option<&'a str> {
        let Some(nul) = self.rest.iter().position(|&b| b == 0) else {
            self.rest = &[];
            return None;
        };
        let bytes = self.take(nul + 1)?;
        match std::str::from_utf8(&bytes[..nul]) {
            Ok(s) => Some(s),
            Err(_) => {
                self.rest = &[];
                None
            }
        }
    }
}

/// Displays a packet on one line. Returned by [`PacketView::display`].
pub struct DisplayPacket<'a, 'b> {
    header: &'b PacketHeader,
    view: &'b PacketView<'a>,
}

impl fmt::Display for DisplayPacket<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(pid={} tid={}) ",
            self.header.sender_pid, self.header.sender_tid
        )?;
        match self.view {
            PacketView::Invalid => {
                write!(f, "INVALID\ttype={},size={}", self.header.packet_type, self.header.size)
            }
            PacketView::Log { stream, text } => {
                write!(f, "LOG\tstream={stream},text={}", text.trim_end_matches('\n'))
            }
            PacketView::Exec { cmdline } => write!(f, "EXEC\tcmdline={cmdline}"),
            PacketView::Exit {
                exit_code,
                time_used,
            } => write!(
                f,
                "EXIT\texitcode={exit_code},timeused={}",
                time_used.unwrap_or("<null>")
            ),
            PacketView::SubtestStart { name } => write!(f, "SUBTEST_START\tname={name}"),
            PacketView::SubtestResult(result) => {
                f.write_str("SUBTEST_RESULT\t")?;
                fmt_result(f, result)
            }
            PacketView::DynamicSubtestStart { name } => {
                write!(f, "DYNAMIC_SUBTEST_START\tname={name}")
            }
            PacketView::DynamicSubtestResult(result) => {
                f.write_str("DYNAMIC_SUBTEST_RESULT\t")?;
                fmt_result(f, result)
            }
            PacketView::VersionString { text } => {
                write!(f, "VERSIONSTRING\ttext={}", text.trim_end_matches('\n'))
            }
            PacketView::ResultOverride { result } => write!(f, "RESULT_OVERRIDE\tresult={result}"),
        }
    }
}

fn fmt_result(f: &mut fmt::Formatter<'_>, result: &ResultView<'_>) -> fmt::Result {
    write!(
        f,
        "name={},result={},timeused={},reason={}",
        result.name,
        result.result,
        result.time_used.unwrap_or("<null>"),
        result.reason.unwrap_or("<null>"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn log_packet_decodes() {
        let packet = RunnerPacket::log(5, "Text one");
        assert_eq!(packet.size() as usize, HEADER_SIZE + 1 + "Text one".len() + 1);
        assert_eq!(
            packet.decode(),
            PacketView::Log {
                stream: 5,
                text: "Text one"
            }
        );
    }

    #[test]
    fn log_packet_size_below_header_is_invalid() {
        let mut packet = RunnerPacket::log(5, "Text one");
        packet.set_size(HEADER_SIZE as u32 - 1);
        assert_eq!(packet.decode(), PacketView::Invalid);
    }

    #[test]
    fn log_packet_missing_nul_is_invalid() {
        let mut packet = RunnerPacket::log(5, "Text one");
        let size = packet.size();
        // The buffer still has the NUL, but it now lies outside the declared size.
        packet.set_size(size - 2);
        assert_eq!(packet.decode(), PacketView::Invalid);
    }

    #[test]
    fn size_larger_than_buffer_is_invalid() {
        let mut packet = RunnerPacket::subtest_start("first-subtest");
        let size = packet.size();
        packet.set_size(size + 1);
        assert_eq!(packet.decode(), PacketView::Invalid);
    }

    #[test]
    fn exec_joins_arguments() {
        let packet = RunnerPacket::exec(["/path/to/test", "--run-subtest", "a,b"]);
        assert_eq!(
            packet.decode(),
            PacketView::Exec {
                cmdline: "/path/to/test --run-subtest a,b"
            }
        );
    }

    #[test]
    fn exit_packet() {
        let packet = RunnerPacket::exit(-67, "0.123");
        assert_eq!(
            packet.decode(),
            PacketView::Exit {
                exit_code: -67,
                time_used: Some("0.123"),
            }
        );
    }

    #[test]
    fn subtest_result_with_empty_reason() {
        let packet = RunnerPacket::subtest_result("first-subtest", "SUCCESS", "0.010", "");
        assert_eq!(
            packet.decode(),
            PacketView::SubtestResult(ResultView {
                name: "first-subtest",
                result: "SUCCESS",
                time_used: Some("0.010"),
                reason: Some(""),
            })
        );
    }

    #[test]
    fn subtest_result_missing_result_is_invalid() {
        let mut packet = RunnerPacket::subtest_result("a", "FAIL", "1.000", "broken");
        // Keep only the name: header + "a\0".
        packet.set_size(HEADER_SIZE as u32 + 2);
        assert_eq!(packet.decode(), PacketView::Invalid);
    }

    #[test]
    fn dynamic_subtest_result_optional_fields() {
        let mut packet = RunnerPacket::dynamic_subtest_result("dyn", "SKIP", "0.500", "no hw");
        // Cut off the reason: header + "dyn\0" + "SKIP\0" + "0.500\0".
        packet.set_size(HEADER_SIZE as u32 + 4 + 5 + 6);
        assert_eq!(
            packet.decode(),
            PacketView::DynamicSubtestResult(ResultView {
                name: "dyn",
                result: "SKIP",
                time_used: Some("0.500"),
                reason: None,
            })
        );
    }

    #[test]
    fn unknown_type_is_invalid() {
        let packet = RunnerPacket::versionstring("IGT-Version 1.0");
        let mut bytes = packet.as_bytes().to_vec();
        bytes[4..8].copy_from_slice(&42u32.to_ne_bytes());
        assert_eq!(PacketView::decode(&bytes), PacketView::Invalid);
    }

    #[test]
    fn embedded_nul_is_truncated() {
        let packet = RunnerPacket::result_override("time\0out");
        assert_eq!(
            packet.decode(),
            PacketView::ResultOverride { result: "time" }
        );
    }

    #[test]
    fn display_format() {
        let packet = RunnerPacket::log(1, "hello\n");
        let mut header = packet.header();
        header.sender_pid = 10;
        header.sender_tid = 11;
        let view = packet.decode();
        assert_eq!(
            view.display(&header).to_string(),
            "(pid=10 tid=11) LOG\tstream=1,text=hello"
        );
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
            let _ = PacketView::decode(&bytes);
        }

        #[test]
        fn truncation_never_reads_past_size(text in "[a-z ]{0,32}", cut in 1u32..16) {
            let mut packet = RunnerPacket::log(1, &text);
            let size = packet.size();
            packet.set_size(size.saturating_sub(cut));
            // Any cut removes the terminating NUL from the declared span.
            prop_assert_eq!(packet.decode(), PacketView::Invalid);
        }
    }
}
