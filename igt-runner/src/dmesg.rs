// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capturing kernel log records written while a job runs.

use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind, Read, Seek, SeekFrom, Write},
    os::unix::fs::OpenOptionsExt,
};
use tracing::warn;

const KMSG_PATH: &str = "/dev/kmsg";

/// Each read from `/dev/kmsg` returns at most one record. Longer records fail with EINVAL.
const RECORD_BUF_SIZE: usize = 8192;

/// A non-blocking reader positioned at the end of the kernel log.
#[derive(Debug)]
pub(crate) struct KmsgReader {
    file: Option<File>,
}

impl KmsgReader {
    /// Opens `/dev/kmsg` and skips every record already in the buffer.
    ///
    /// If the device cannot be opened, the reader captures nothing.
    pub(crate) fn open() -> Self {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(KMSG_PATH);
        match file {
            Ok(file) => Self::from_file(file),
            Err(error) => {
                warn!("cannot open {KMSG_PATH}, dmesg will not be captured: {error}");
                Self { file: None }
            }
        }
    }

    pub(crate) fn from_file(mut file: File) -> Self {
        if let Err(error) = file.seek(SeekFrom::End(0)) {
            warn!("cannot seek to the end of the kernel log: {error}");
        }
        Self { file: Some(file) }
    }

    /// Copies every record since the last drain into `out`. Returns the number of bytes copied.
    pub(crate) fn drain_into(&mut self, out: &mut impl Write) -> io::Result<usize> {
        let Some(file) = &mut self.file else {
            return Ok(0);
        };

        let mut buf = vec![0; RECORD_BUF_SIZE];
        let mut copied = 0;
        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    out.write_all(&buf[..n])?;
                    copied += n;
                }
                Err(error) => match error.kind() {
                    ErrorKind::WouldBlock => break,
                    ErrorKind::Interrupted => {}
                    // Records were overwritten before we read them. The next read continues from
                    // the oldest record still available.
                    _ if error.raw_os_error() == Some(libc::EPIPE) => {}
                    _ if error.raw_os_error() == Some(libc::EINVAL) => {
                        warn!("buffer too small for kernel log record, record lost");
                    }
                    _ => {
                        warn!("error reading kernel log, stopping capture: {error}");
                        self.file = None;
                        break;
                    }
                },
            }
        }
        Ok(copied)
    }
}
